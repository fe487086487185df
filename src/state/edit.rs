/// Undo/redo over successive versions of one image
///
/// An edit session starts from a result image and records every version
/// produced by further prompt-driven edits. Versions are data URIs. The
/// session lives only for one editing workflow and is never persisted.

/// Undo and redo stacks for one image lineage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    /// The image the session was opened with
    original_image: String,
    /// The version currently shown
    current_image: String,
    /// Older versions, most recent last
    undo_stack: Vec<String>,
    /// Undone versions, most recently undone last
    redo_stack: Vec<String>,
}

impl EditSession {
    /// Start a session on `image` with empty stacks
    pub fn new(image: impl Into<String>) -> Self {
        let image = image.into();
        Self {
            original_image: image.clone(),
            current_image: image,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    pub fn current(&self) -> &str {
        &self.current_image
    }

    pub fn original(&self) -> &str {
        &self.original_image
    }

    pub fn undo_stack(&self) -> &[String] {
        &self.undo_stack
    }

    pub fn redo_stack(&self) -> &[String] {
        &self.redo_stack
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Make `new_image` current. Invalidates everything that was undone.
    pub fn apply_edit(&mut self, new_image: impl Into<String>) {
        let previous = std::mem::replace(&mut self.current_image, new_image.into());
        self.undo_stack.push(previous);
        self.redo_stack.clear();
    }

    /// Step back one version. Returns false (and does nothing) when there is none.
    pub fn undo(&mut self) -> bool {
        match self.undo_stack.pop() {
            Some(previous) => {
                let outgoing = std::mem::replace(&mut self.current_image, previous);
                self.redo_stack.push(outgoing);
                true
            }
            None => false,
        }
    }

    /// Step forward one undone version. Returns false when there is none.
    pub fn redo(&mut self) -> bool {
        match self.redo_stack.pop() {
            Some(next) => {
                let outgoing = std::mem::replace(&mut self.current_image, next);
                self.undo_stack.push(outgoing);
                true
            }
            None => false,
        }
    }
}
