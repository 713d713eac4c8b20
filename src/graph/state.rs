//! State: упорядоченное отображение структурных путей в снимки состояния.
//!
//! Порядок вставки совпадает с каноническим порядком обхода при flatten,
//! поэтому два State сравнимы и диффабельны напрямую.

use crate::graph::{GraphError, GraphResult};
use crate::value::Value;
use crate::variable::VariableState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Один шаг структурного пути: индекс в последовательности или имя поля.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{}", i),
            Key::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

/// Путь от корня графа до слота; отображается через точку: `layers.0.w`.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Path(pub Vec<Key>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.0.push(key.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn push(&mut self, key: Key) {
        self.0.push(key);
    }

    pub(crate) fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

impl From<Vec<Key>> for Path {
    fn from(keys: Vec<Key>) -> Self {
        Self(keys)
    }
}

/// Запись State: снимок переменной либо неупакованный лист
/// (динамическое поле pytree или голое значение).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateEntry {
    Variable(VariableState),
    Leaf(Value),
}

impl StateEntry {
    pub fn as_variable(&self) -> Option<&VariableState> {
        match self {
            StateEntry::Variable(vs) => Some(vs),
            StateEntry::Leaf(_) => None,
        }
    }

    pub fn as_variable_mut(&mut self) -> Option<&mut VariableState> {
        match self {
            StateEntry::Variable(vs) => Some(vs),
            StateEntry::Leaf(_) => None,
        }
    }

    /// Значение записи независимо от её рода.
    pub fn value(&self) -> &Value {
        match self {
            StateEntry::Variable(vs) => &vs.value,
            StateEntry::Leaf(v) => v,
        }
    }
}

/// Плоское динамическое состояние графа: пары (путь, запись) в порядке
/// канонического обхода.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    entries: Vec<(Path, StateEntry)>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Добавляет запись в конец; дублирующийся путь — ошибка.
    pub fn insert(&mut self, path: Path, entry: StateEntry) -> GraphResult<()> {
        if self.get(&path).is_some() {
            return Err(GraphError::DuplicatePath(path.to_string()));
        }
        self.entries.push((path, entry));
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<&StateEntry> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, e)| e)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut StateEntry> {
        self.entries
            .iter_mut()
            .find(|(p, _)| p == path)
            .map(|(_, e)| e)
    }

    /// Извлекает запись по пути, сохраняя порядок остальных.
    pub fn take(&mut self, path: &Path) -> Option<StateEntry> {
        let pos = self.entries.iter().position(|(p, _)| p == path)?;
        Some(self.entries.remove(pos).1)
    }

    /// Все записи в порядке обхода.
    pub fn flat_state(&self) -> &[(Path, StateEntry)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Path, StateEntry)> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<(Path, StateEntry)> {
        self.entries
    }

    /// Делит состояние на (подходящие, остальные), сохраняя порядок.
    pub fn split_by(
        self,
        predicate: impl Fn(&Path, &StateEntry) -> bool,
    ) -> (State, State) {
        let mut matched = State::new();
        let mut rest = State::new();
        for (path, entry) in self.entries {
            if predicate(&path, &entry) {
                matched.entries.push((path, entry));
            } else {
                rest.entries.push((path, entry));
            }
        }
        (matched, rest)
    }

    /// Записи переменных указанного вида (например, только `Param`).
    pub fn filter_kind(&self, kind: &str) -> State {
        let mut out = State::new();
        for (path, entry) in &self.entries {
            if let StateEntry::Variable(vs) = entry {
                if vs.kind == kind {
                    out.entries.push((path.clone(), entry.clone()));
                }
            }
        }
        out
    }
}

impl IntoIterator for State {
    type Item = (Path, StateEntry);
    type IntoIter = std::vec::IntoIter<(Path, StateEntry)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
