//! Эпохи трассировки: окно валидности для мутаций переменных.
//!
//! Каждая переменная при создании получает штамп текущей эпохи. Пересечение
//! границы чистой функции (см. [`crate::graph::context::UpdateContext::pure`])
//! открывает новую эпоху: попытка записать значение в переменную, созданную
//! в другой эпохе, обязана упасть сразу, а не молча испортить состояние.
//!
//! Стек эпох локален для потока: каждый поток работает со своим независимым
//! графом, межпоточного разделения здесь нет.

use std::cell::{Cell, RefCell};

pub type EpochId = u64;

thread_local! {
    static STACK: RefCell<Vec<EpochId>> = const { RefCell::new(Vec::new()) };
    static NEXT: Cell<EpochId> = const { Cell::new(1) };
}

/// Текущая (самая внутренняя) эпоха потока. Корневая эпоха — 0.
pub fn current_epoch() -> EpochId {
    STACK.with(|s| s.borrow().last().copied().unwrap_or(0))
}

struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// Выполняет `f` внутри свежей эпохи.
///
/// Эпоха закрывается при выходе из `f`, в том числе при панике.
pub fn scope<R>(f: impl FnOnce() -> R) -> R {
    let id = NEXT.with(|n| {
        let id = n.get();
        n.set(id + 1);
        id
    });
    STACK.with(|s| s.borrow_mut().push(id));
    let _guard = ScopeGuard;
    f()
}

/// Штамп эпохи, выданный переменной при создании.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceState {
    epoch: EpochId,
}

impl TraceState {
    pub fn new() -> Self {
        Self {
            epoch: current_epoch(),
        }
    }

    /// Валиден ли штамп: совпадает ли он с текущей эпохой потока.
    pub fn is_valid(&self) -> bool {
        self.epoch == current_epoch()
    }

    pub fn epoch(&self) -> EpochId {
        self.epoch
    }
}

impl Default for TraceState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_epoch_is_valid() {
        let ts = TraceState::new();
        assert!(ts.is_valid());
    }

    #[test]
    fn test_scope_invalidates_outer_stamp() {
        let outer = TraceState::new();
        scope(|| {
            assert!(!outer.is_valid());
            let inner = TraceState::new();
            assert!(inner.is_valid());
        });
        assert!(outer.is_valid());
    }

    #[test]
    fn test_nested_scopes() {
        scope(|| {
            let mid = TraceState::new();
            scope(|| {
                assert!(!mid.is_valid());
            });
            assert!(mid.is_valid());
        });
    }
}
