//! Переменные: атомарные единицы изменяемого состояния графа.
//!
//! `Variable` — дескриптор с идентичностью: две переменные с одинаковым
//! содержимым остаются разными сущностями, пока это не буквально один и тот
//! же дескриптор (`ptr_eq`). Именно идентичность, а не равенство значений,
//! отслеживает движок flatten/unflatten при дедупликации разделяемых ссылок.
//!
//! `VariableState` — снимок без идентичности: (вид, значение, метаданные).
//! Он появляется только при flatten и превращается обратно в свежую
//! переменную через `to_variable`.

use crate::trace::TraceState;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

pub type VariableResult<T> = std::result::Result<T, VariableError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VariableError {
    #[error("Нельзя мутировать переменную вида '{0}' из чужой эпохи трассировки")]
    TraceContext(String),
    #[error("Несовместимые виды переменных: ожидался '{expected}', получен '{actual}'")]
    TypeMismatch { expected: String, actual: String },
    #[error("Set-хук отклонил значение: {0}")]
    Rejected(String),
}

/// Метаданные переменной: небольшие самоописываемые значения
/// (например, аннотации шардирования по осям).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f32),
    Str(String),
    List(Vec<MetaValue>),
}

/// Чистый get/create-хук: `(данные переменной, значение) -> значение`.
pub type GetValueHook = Rc<dyn Fn(&VariableData, Value) -> Value>;
/// Set-хук: может преобразовать входящее значение или отклонить его.
pub type SetValueHook = Rc<dyn Fn(&VariableData, Value) -> VariableResult<Value>>;
/// Хук добавления/удаления оси: мутирует значение и метаданные напрямую.
pub type AxisHook = Rc<dyn Fn(&mut VariableData, usize, Option<&str>)>;

/// Упорядоченные списки хуков; вызываются в порядке регистрации.
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_get: Vec<GetValueHook>,
    pub on_set: Vec<SetValueHook>,
    pub on_create: Vec<GetValueHook>,
    pub on_add_axis: Vec<AxisHook>,
    pub on_remove_axis: Vec<AxisHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_get", &self.on_get.len())
            .field("on_set", &self.on_set.len())
            .field("on_create", &self.on_create.len())
            .field("on_add_axis", &self.on_add_axis.len())
            .field("on_remove_axis", &self.on_remove_axis.len())
            .finish()
    }
}

/// Содержимое переменной. Доступно хукам напрямую; весь остальной код
/// работает через дескриптор [`Variable`].
#[derive(Debug)]
pub struct VariableData {
    pub kind: String,
    pub value: Value,
    pub metadata: BTreeMap<String, MetaValue>,
    pub(crate) hooks: Hooks,
    pub(crate) trace_state: TraceState,
}

/// Дескриптор переменной: дешёвый в клонировании, несёт идентичность.
#[derive(Clone)]
pub struct Variable {
    data: Rc<RefCell<VariableData>>,
}

impl Variable {
    /// Создаёт переменную указанного вида, прогоняя create-хуки.
    pub fn with_hooks(kind: impl Into<String>, value: Value, hooks: Hooks) -> Self {
        let mut data = VariableData {
            kind: kind.into(),
            value,
            metadata: BTreeMap::new(),
            hooks,
            trace_state: TraceState::new(),
        };
        let create_hooks = data.hooks.on_create.clone();
        for hook in &create_hooks {
            let current = data.value.clone();
            let updated = hook(&data, current);
            data.value = updated;
        }
        Self {
            data: Rc::new(RefCell::new(data)),
        }
    }

    pub fn new(kind: impl Into<String>, value: Value) -> Self {
        Self::with_hooks(kind, value, Hooks::default())
    }

    /// Обучаемый параметр — канонический вид переменной.
    pub fn param(value: Value) -> Self {
        Self::new(kinds::PARAM, value)
    }

    /// Бегущая статистика батч-нормализации.
    pub fn batch_stat(value: Value) -> Self {
        Self::new(kinds::BATCH_STAT, value)
    }

    /// Авторегрессионный кэш.
    pub fn cache(value: Value) -> Self {
        Self::new(kinds::CACHE, value)
    }

    /// Промежуточная активация.
    pub fn intermediate(value: Value) -> Self {
        Self::new(kinds::INTERMEDIATE, value)
    }

    /// Восстанавливает переменную из значения и метаданных (свежая эпоха).
    pub fn from_metadata(
        kind: impl Into<String>,
        value: Value,
        metadata: BTreeMap<String, MetaValue>,
    ) -> Self {
        Self {
            data: Rc::new(RefCell::new(VariableData {
                kind: kind.into(),
                value,
                metadata,
                hooks: Hooks::default(),
                trace_state: TraceState::new(),
            })),
        }
    }

    pub fn kind(&self) -> String {
        self.data.borrow().kind.clone()
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.data.borrow().kind == kind
    }

    /// Значение после get-хуков (в порядке регистрации).
    pub fn value(&self) -> Value {
        let data = self.data.borrow();
        let mut value = data.value.clone();
        for hook in &data.hooks.on_get {
            value = hook(&data, value);
        }
        value
    }

    /// Сырое значение, без хуков.
    pub fn raw_value(&self) -> Value {
        self.data.borrow().value.clone()
    }

    /// Записывает значение: проверка эпохи, затем set-хуки
    /// (каждый может преобразовать или отклонить).
    pub fn set_value(&self, value: Value) -> VariableResult<()> {
        let mut data = self.data.borrow_mut();
        if !data.trace_state.is_valid() {
            return Err(VariableError::TraceContext(data.kind.clone()));
        }
        let hooks = data.hooks.on_set.clone();
        let mut value = value;
        for hook in &hooks {
            value = hook(&data, value)?;
        }
        data.value = value;
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Option<MetaValue> {
        self.data.borrow().metadata.get(key).cloned()
    }

    pub fn metadata_map(&self) -> BTreeMap<String, MetaValue> {
        self.data.borrow().metadata.clone()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: MetaValue) -> VariableResult<()> {
        let mut data = self.data.borrow_mut();
        if !data.trace_state.is_valid() {
            return Err(VariableError::TraceContext(data.kind.clone()));
        }
        data.metadata.insert(key.into(), value);
        Ok(())
    }

    /// Вызывает add-axis-хуки: батчирующая трансформация вставила ось.
    pub fn add_axis(&self, index: usize, name: Option<&str>) -> VariableResult<()> {
        let mut data = self.data.borrow_mut();
        if !data.trace_state.is_valid() {
            return Err(VariableError::TraceContext(data.kind.clone()));
        }
        let hooks = data.hooks.on_add_axis.clone();
        for hook in &hooks {
            hook(&mut data, index, name);
        }
        Ok(())
    }

    /// Вызывает remove-axis-хуки: трансформация убрала ось.
    pub fn remove_axis(&self, index: usize, name: Option<&str>) -> VariableResult<()> {
        let mut data = self.data.borrow_mut();
        if !data.trace_state.is_valid() {
            return Err(VariableError::TraceContext(data.kind.clone()));
        }
        let hooks = data.hooks.on_remove_axis.clone();
        for hook in &hooks {
            hook(&mut data, index, name);
        }
        Ok(())
    }

    /// Новая переменная того же вида с другим значением; хуки и метаданные
    /// сохраняются, эпоха — свежая.
    pub fn replace(&self, value: Value) -> Variable {
        let data = self.data.borrow();
        Variable {
            data: Rc::new(RefCell::new(VariableData {
                kind: data.kind.clone(),
                value,
                metadata: data.metadata.clone(),
                hooks: data.hooks.clone(),
                trace_state: TraceState::new(),
            })),
        }
    }

    /// Полная копия с новой идентичностью и свежей эпохой.
    pub fn copy(&self) -> Variable {
        self.replace(self.raw_value())
    }

    /// Копирует содержимое `other` в эту переменную.
    ///
    /// Виды должны совпадать; собственная эпоха получателя сохраняется.
    /// Копирование из самого себя — no-op.
    pub fn copy_from(&self, other: &Variable) -> VariableResult<()> {
        if self.ptr_eq(other) {
            return Ok(());
        }
        {
            let this = self.data.borrow();
            let that = other.data.borrow();
            if this.kind != that.kind {
                return Err(VariableError::TypeMismatch {
                    expected: this.kind.clone(),
                    actual: that.kind.clone(),
                });
            }
        }
        let that = other.data.borrow();
        let mut this = self.data.borrow_mut();
        this.value = that.value.clone();
        this.metadata = that.metadata.clone();
        this.hooks = that.hooks.clone();
        Ok(())
    }

    /// Снимок без идентичности. Хуки едут вместе со снимком, но не участвуют
    /// ни в равенстве, ни в сериализации.
    pub fn to_state(&self) -> VariableState {
        let data = self.data.borrow();
        VariableState {
            kind: data.kind.clone(),
            value: data.value.clone(),
            metadata: data.metadata.clone(),
            hooks: data.hooks.clone(),
        }
    }

    /// Записывает снимок в существующую переменную, сохраняя её идентичность
    /// и эпоху. Используется движком при восстановлении через кэш индексов.
    pub fn update_from_state(&self, state: &VariableState) {
        let mut data = self.data.borrow_mut();
        data.kind = state.kind.clone();
        data.value = state.value.clone();
        data.metadata = state.metadata.clone();
        data.hooks = state.hooks.clone();
    }

    /// Идентичность дескрипторов: буквально один и тот же объект.
    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    /// Адрес для индекса идентичности (RefMap).
    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.data) as usize
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.borrow();
        f.debug_struct("Variable")
            .field("kind", &data.kind)
            .field("value", &data.value)
            .field("metadata", &data.metadata)
            .finish()
    }
}

/// Равенство по содержимому (вид, значение, метаданные) — как у снимков.
/// Идентичность проверяется отдельно через [`Variable::ptr_eq`].
impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let this = self.data.borrow();
        let that = other.data.borrow();
        this.kind == that.kind && this.value == that.value && this.metadata == that.metadata
    }
}

/// Снимок переменной: вид, значение, метаданные. Без идентичности
/// и без поведения.
#[derive(Clone, Serialize, Deserialize)]
pub struct VariableState {
    pub kind: String,
    pub value: Value,
    pub metadata: BTreeMap<String, MetaValue>,
    #[serde(skip)]
    pub(crate) hooks: Hooks,
}

impl VariableState {
    pub fn new(kind: impl Into<String>, value: Value) -> Self {
        Self {
            kind: kind.into(),
            value,
            metadata: BTreeMap::new(),
            hooks: Hooks::default(),
        }
    }

    pub fn with_metadata(
        kind: impl Into<String>,
        value: Value,
        metadata: BTreeMap<String, MetaValue>,
    ) -> Self {
        Self {
            kind: kind.into(),
            value,
            metadata,
            hooks: Hooks::default(),
        }
    }

    /// Тот же вид и метаданные, другое значение.
    pub fn replace(&self, value: Value) -> VariableState {
        VariableState {
            kind: self.kind.clone(),
            value,
            metadata: self.metadata.clone(),
            hooks: self.hooks.clone(),
        }
    }

    /// Свежая переменная из снимка: новая идентичность, новая эпоха.
    pub fn to_variable(&self) -> Variable {
        Variable {
            data: Rc::new(RefCell::new(VariableData {
                kind: self.kind.clone(),
                value: self.value.clone(),
                metadata: self.metadata.clone(),
                hooks: self.hooks.clone(),
                trace_state: TraceState::new(),
            })),
        }
    }

    pub fn get_metadata(&self) -> &BTreeMap<String, MetaValue> {
        &self.metadata
    }
}

impl fmt::Debug for VariableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableState")
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl PartialEq for VariableState {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value == other.value && self.metadata == other.metadata
    }
}

/// Канонические виды переменных.
pub mod kinds {
    pub const PARAM: &str = "Param";
    pub const BATCH_STAT: &str = "BatchStat";
    pub const CACHE: &str = "Cache";
    pub const INTERMEDIATE: &str = "Intermediate";
}
