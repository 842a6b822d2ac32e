use api::Note;

/// The client-side mirror of the signed-in user's notes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectionState {
    /// One entry per id, newest `updated_at` first.
    pub notes: Vec<Note>,
    pub error: Option<String>,
    pub search_query: String,
    pub selected_id: Option<String>,
    pending: usize,
    epoch: u64,
}

impl CollectionState {
    /// Any fetch or mutation awaiting the gateway.
    pub fn is_loading(&self) -> bool {
        self.pending > 0
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    /// The selected note, if it is still in the set.
    pub fn selected(&self) -> Option<&Note> {
        self.selected_id.as_deref().and_then(|id| self.get(id))
    }

    /// Notes whose title or content contains the search query, ignoring case,
    /// in collection order. A blank query keeps everything.
    pub fn filtered(&self) -> Vec<Note> {
        if self.search_query.trim().is_empty() {
            return self.notes.clone();
        }
        let needle = self.search_query.to_lowercase();
        self.notes
            .iter()
            .filter(|n| n.matches(&needle))
            .cloned()
            .collect()
    }

    pub(crate) fn begin(&mut self) {
        self.pending += 1;
        self.error = None;
    }

    pub(crate) fn finish(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    /// Bumped by every reset, so a write that began before it can tell.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Forget the collection. In-flight operations keep their pending count.
    pub(crate) fn reset(&mut self) {
        *self = CollectionState {
            pending: self.pending,
            epoch: self.epoch.wrapping_add(1),
            ..CollectionState::default()
        };
    }
}
