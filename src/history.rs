//! Bounded undo/redo history.
//!
//! A [`Command`] is a pair of actions on some target `T`. Adding a command to
//! an [`UndoStack`] performs its redo action once and records it; the stack
//! only ever holds commands that have already been applied (up to the
//! current position). Stacks are kept in a [`HistoryRegistry`] under a name,
//! for instance one per edited product.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::error::HistoryError;

/// An action applied to the history's target.
pub type Action<T> = Box<dyn FnMut(&mut T)>;

/// A reversible change.
pub struct Command<T: ?Sized> {
    label: String,
    undo: Action<T>,
    redo: Action<T>,
}

impl<T: ?Sized> Command<T> {
    /// Creates a command from both actions.
    pub fn new(
        label: impl Into<String>,
        undo: impl FnMut(&mut T) + 'static,
        redo: impl FnMut(&mut T) + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            undo: Box::new(undo),
            redo: Box::new(redo),
        }
    }

    pub fn builder(label: impl Into<String>) -> CommandBuilder<T> {
        CommandBuilder {
            label: label.into(),
            undo: None,
            redo: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Splits the command into its undo and redo actions.
    pub fn into_actions(self) -> (Action<T>, Action<T>) {
        (self.undo, self.redo)
    }
}

impl<T: ?Sized> fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("label", &self.label).finish()
    }
}

/// Assembles a command whose actions may be supplied separately.
///
/// # Examples
/// ```
/// use stack_it_now::history::Command;
///
/// let missing = Command::<i32>::builder("bump").redo(|n| *n += 1).build();
/// assert!(missing.is_err());
/// ```
pub struct CommandBuilder<T: ?Sized> {
    label: String,
    undo: Option<Action<T>>,
    redo: Option<Action<T>>,
}

impl<T: ?Sized> CommandBuilder<T> {
    pub fn undo(mut self, action: impl FnMut(&mut T) + 'static) -> Self {
        self.undo = Some(Box::new(action));
        self
    }

    pub fn redo(mut self, action: impl FnMut(&mut T) + 'static) -> Self {
        self.redo = Some(Box::new(action));
        self
    }

    /// Fails if either action is missing.
    pub fn build(self) -> Result<Command<T>, HistoryError> {
        let undo = self.undo.ok_or(HistoryError::MissingUndo)?;
        let redo = self.redo.ok_or(HistoryError::MissingRedo)?;
        Ok(Command {
            label: self.label,
            undo,
            redo,
        })
    }
}

/// Linear history of applied commands with a redo tail.
pub struct UndoStack<T: ?Sized> {
    commands: Vec<Command<T>>,
    /// Number of commands currently applied; `commands[applied..]` can be redone.
    applied: usize,
    /// Maximum number of commands kept, `0` for no limit.
    limit: usize,
}

impl<T: ?Sized> UndoStack<T> {
    pub const DEFAULT_LIMIT: usize = 9;

    pub fn new() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            commands: Vec::new(),
            applied: 0,
            limit,
        }
    }

    /// Applies `command` to `target` and records it.
    ///
    /// Anything that could still be redone is discarded. When the limit is
    /// exceeded the oldest command is dropped.
    pub fn add(&mut self, target: &mut T, mut command: Command<T>) {
        (command.redo)(target);
        self.record(command);
    }

    /// Builds a command and adds it; nothing runs if an action is missing.
    pub fn try_add(
        &mut self,
        target: &mut T,
        command: CommandBuilder<T>,
    ) -> Result<(), HistoryError> {
        let command = command.build()?;
        self.add(target, command);
        Ok(())
    }

    /// Records a command whose effect has already been applied.
    pub fn record(&mut self, command: Command<T>) {
        self.commands.truncate(self.applied);
        debug!("History: recorded '{}'", command.label);
        self.commands.push(command);
        self.applied = self.commands.len();
        self.enforce_limit();
    }

    /// Reverts the most recent applied command.
    ///
    /// # Returns
    /// `false` if there was nothing to undo.
    pub fn undo(&mut self, target: &mut T) -> bool {
        if self.applied == 0 {
            return false;
        }
        self.applied -= 1;
        let command = &mut self.commands[self.applied];
        debug!("History: undo '{}'", command.label);
        (command.undo)(target);
        true
    }

    /// Re-applies the next undone command.
    ///
    /// # Returns
    /// `false` if there was nothing to redo.
    pub fn redo(&mut self, target: &mut T) -> bool {
        let Some(command) = self.commands.get_mut(self.applied) else {
            return false;
        };
        debug!("History: redo '{}'", command.label);
        (command.redo)(target);
        self.applied += 1;
        true
    }

    pub fn has_undo(&self) -> bool {
        self.applied > 0
    }

    pub fn has_redo(&self) -> bool {
        self.applied < self.commands.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        self.enforce_limit();
    }

    /// Number of commands held, applied or not.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Label of the command the next undo would revert.
    pub fn next_undo_label(&self) -> Option<&str> {
        self.applied
            .checked_sub(1)
            .and_then(|i| self.commands.get(i))
            .map(Command::label)
    }

    /// Forgets every command without running anything.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.applied = 0;
    }

    fn enforce_limit(&mut self) {
        if self.limit == 0 || self.commands.len() <= self.limit {
            return;
        }
        let excess = self.commands.len() - self.limit;
        self.commands.drain(..excess);
        self.applied = self.applied.saturating_sub(excess);
    }
}

impl<T: ?Sized> Default for UndoStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for UndoStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoStack")
            .field("commands", &self.commands)
            .field("applied", &self.applied)
            .field("limit", &self.limit)
            .finish()
    }
}

/// Named undo stacks, created on first use.
pub struct HistoryRegistry<T: ?Sized> {
    stacks: HashMap<String, UndoStack<T>>,
    default_limit: usize,
}

impl<T: ?Sized> HistoryRegistry<T> {
    pub fn new(default_limit: usize) -> Self {
        Self {
            stacks: HashMap::new(),
            default_limit,
        }
    }

    /// Returns the stack registered under `name`, creating it if needed.
    pub fn get_or_create(&mut self, name: &str) -> &mut UndoStack<T> {
        let limit = self.default_limit;
        self.stacks
            .entry(name.to_string())
            .or_insert_with(|| UndoStack::with_limit(limit))
    }

    pub fn get(&self, name: &str) -> Option<&UndoStack<T>> {
        self.stacks.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut UndoStack<T>> {
        self.stacks.get_mut(name)
    }

    /// Empties a stack without removing it.
    pub fn clear(&mut self, name: &str) {
        if let Some(stack) = self.stacks.get_mut(name) {
            stack.clear();
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<UndoStack<T>> {
        self.stacks.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stacks.keys().map(String::as_str)
    }
}

impl<T: ?Sized> Default for HistoryRegistry<T> {
    fn default() -> Self {
        Self::new(UndoStack::<T>::DEFAULT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::PartId;
    use crate::grid::OccupancyGrid;
    use slotmap::SlotMap;

    fn bump(label: &str, by: i32) -> Command<i32> {
        Command::new(label, move |n: &mut i32| *n -= by, move |n: &mut i32| *n += by)
    }

    #[test]
    fn test_add_applies_redo_exactly_once() {
        let mut value = 0;
        let mut stack = UndoStack::new();
        stack.add(&mut value, bump("one", 1));
        assert_eq!(value, 1);
        assert!(stack.has_undo());
        assert!(!stack.has_redo());
    }

    #[test]
    fn test_undo_redo_walk_the_stack() {
        let mut value = 0;
        let mut stack = UndoStack::new();
        stack.add(&mut value, bump("one", 1));
        stack.add(&mut value, bump("ten", 10));
        assert_eq!(stack.next_undo_label(), Some("ten"));

        assert!(stack.undo(&mut value));
        assert_eq!(value, 1);
        assert!(stack.undo(&mut value));
        assert_eq!(value, 0);
        assert!(!stack.undo(&mut value));

        assert!(stack.redo(&mut value));
        assert!(stack.redo(&mut value));
        assert!(!stack.redo(&mut value));
        assert_eq!(value, 11);
    }

    #[test]
    fn test_add_after_undo_discards_redo_tail() {
        let mut value = 0;
        let mut stack = UndoStack::new();
        stack.add(&mut value, bump("one", 1));
        stack.add(&mut value, bump("two", 2));
        stack.undo(&mut value);
        stack.add(&mut value, bump("five", 5));
        assert_eq!(value, 6);
        assert_eq!(stack.len(), 2);
        assert!(!stack.has_redo());
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut value = 0;
        let mut stack = UndoStack::new();
        for _ in 0..12 {
            stack.add(&mut value, bump("one", 1));
        }
        assert_eq!(stack.len(), 9);
        while stack.undo(&mut value) {}
        assert_eq!(value, 3);

        stack.set_limit(2);
        assert_eq!(stack.len(), 2);
        assert!(!stack.has_undo());
        assert!(stack.redo(&mut value));
        assert!(stack.redo(&mut value));
        assert!(!stack.redo(&mut value));
    }

    #[test]
    fn test_missing_actions_are_rejected_before_running() {
        let mut value = 0;
        let mut stack = UndoStack::new();
        let err = stack
            .try_add(&mut value, Command::builder("half").redo(|n: &mut i32| *n += 1))
            .unwrap_err();
        assert_eq!(err, HistoryError::MissingUndo);
        assert_eq!(err.to_string(), "undo not defined");

        let err = Command::<i32>::builder("half")
            .undo(|n| *n -= 1)
            .build()
            .unwrap_err();
        assert_eq!(err, HistoryError::MissingRedo);
        assert_eq!(value, 0);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_record_does_not_execute() {
        let mut value = 5;
        let mut stack = UndoStack::new();
        stack.record(bump("already", 5));
        assert_eq!(value, 5);
        stack.undo(&mut value);
        assert_eq!(value, 0);
    }

    #[test]
    fn test_undo_restores_grid_state() {
        let mut ids: SlotMap<PartId, ()> = SlotMap::with_key();
        let owner = ids.insert(());
        let mut grid = OccupancyGrid::surface(3, 3, None);
        let before = grid.clone();
        let mut stack = UndoStack::new();

        stack.add(
            &mut grid,
            Command::new(
                "claim center",
                move |g: &mut OccupancyGrid| {
                    g.free_cells(owner);
                },
                move |g: &mut OccupancyGrid| g.mark_cell(1, 1, owner),
            ),
        );
        let after_add = grid.clone();
        assert_eq!(grid.cells_available(), before.cells_available() - 1);

        stack.undo(&mut grid);
        assert_eq!(grid, before);
        stack.redo(&mut grid);
        assert_eq!(grid, after_add);
    }

    #[test]
    fn test_registry_keeps_named_stacks_apart() {
        let mut value = 0;
        let mut registry: HistoryRegistry<i32> = HistoryRegistry::new(3);
        registry.get_or_create("table").add(&mut value, bump("one", 1));
        registry.get_or_create("chair").add(&mut value, bump("two", 2));
        assert_eq!(registry.get("table").map(UndoStack::len), Some(1));
        assert_eq!(registry.get_or_create("chair").limit(), 3);

        registry.clear("table");
        assert_eq!(registry.get("table").map(UndoStack::is_empty), Some(true));
        assert!(registry.get("sofa").is_none());
        assert_eq!(registry.names().count(), 2);
        assert!(registry.remove("chair").is_some());
    }
}
