/// State management module
///
/// This module handles all application state, including:
/// - The local slot store backed by SQLite (library.rs)
/// - Shared data structures (data.rs)
/// - Creation history and its persistence policy (history.rs)
/// - Edit sessions with undo/redo stacks (edit.rs)
/// - The screen state container and its reducer (app.rs)

pub mod app;
pub mod data;
pub mod edit;
pub mod history;
pub mod library;
