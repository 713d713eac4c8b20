//! Контексты split/merge: согласование идентичности между вызовами.
//!
//! Один вызов границы часто разделяет несколько корней (два аргумента,
//! ссылающихся на один подмодуль) и собирает несколько корней на обратном
//! пути. Split-контекст делит одну карту идентичности между всеми split'ами
//! своей области — межаргументный алиасинг сворачивается в NodeRef.
//! Merge-контекст симметрично делит один реестр индексов между merge'ами.
//!
//! Update-контекст связывает исходящий и входящий проходы одного раунда
//! границы: внешний split запоминает свою карту, внутренний merge — свой
//! реестр, внутренний split подшивает их композицию (`index_mapping`) в
//! корневой NodeDef, а внешний merge выводит из неё кэш идентичности и
//! записывает мутации обратно в исходные объекты, включая обмены полей
//! и появившиеся внутри границы самоссылки.
//!
//! Контексты передаются явно и живут ровно одну замыкание-область:
//! никаких глобальных стеков.

use crate::graph::flatten::flatten;
use crate::graph::graphdef::GraphDef;
use crate::graph::object::{Object, StaticValue};
use crate::graph::refmap::{compose_mapping, compose_mapping_reversed, IndexRef, RefMap};
use crate::graph::state::State;
use crate::graph::unflatten::unflatten;
use crate::graph::{GraphError, GraphResult};
use crate::registry::Registry;
use crate::trace;
use log::debug;
use std::collections::HashMap;

/// Область разделения с общей картой идентичности.
pub struct SplitContext {
    ref_index: RefMap,
    prefixes: HashMap<usize, StaticValue>,
    inner_index_ref: Option<IndexRef>,
}

impl SplitContext {
    fn new(inner_index_ref: Option<IndexRef>) -> Self {
        Self {
            ref_index: RefMap::new(),
            prefixes: HashMap::new(),
            inner_index_ref,
        }
    }

    /// Разделяет корень, используя общую карту области. Повторный split
    /// уже виденного корня даёт верхнеуровневый NodeRef и пустой State.
    pub fn split(&mut self, root: &Object) -> GraphResult<(GraphDef, State)> {
        let (mut def, state) = flatten(root, &mut self.ref_index)?;
        if let (Some(inner), GraphDef::Node(node_def)) = (&self.inner_index_ref, &mut def) {
            // внутренний split раунда: подшиваем корреляцию индексов
            let mut mapping: Vec<_> = compose_mapping(inner, &self.ref_index)
                .into_iter()
                .collect();
            mapping.sort_unstable();
            debug!("split: подшита корреляция из {} пар", mapping.len());
            node_def.index_mapping = Some(mapping);
        }
        Ok((def, state))
    }

    /// Как [`split`](Self::split), но со спецификацией-префиксом слота.
    /// Один и тот же объект, разделённый с разными префиксами в одной
    /// области, — ошибка согласованности алиасинга.
    pub fn split_with_prefix(
        &mut self,
        root: &Object,
        prefix: StaticValue,
    ) -> GraphResult<(GraphDef, State)> {
        if let Some(id) = root.identity_id() {
            match self.prefixes.get(&id) {
                Some(existing) if *existing != prefix => {
                    return Err(GraphError::AliasingInconsistency(
                        existing.to_string(),
                        prefix.to_string(),
                    ));
                }
                Some(_) => {}
                None => {
                    self.prefixes.insert(id, prefix);
                }
            }
        }
        self.split(root)
    }

    pub fn ref_index(&self) -> &RefMap {
        &self.ref_index
    }

    fn into_ref_index(self) -> RefMap {
        self.ref_index
    }
}

/// Область сборки с общим реестром индексов.
pub struct MergeContext<'r> {
    registry: &'r Registry,
    index_ref: IndexRef,
    outer_ref_index: Option<RefMap>,
    cache: IndexRef,
}

impl<'r> MergeContext<'r> {
    fn inner(registry: &'r Registry) -> Self {
        Self {
            registry,
            index_ref: IndexRef::new(),
            outer_ref_index: None,
            cache: IndexRef::new(),
        }
    }

    fn outer(registry: &'r Registry, outer_ref_index: Option<RefMap>) -> Self {
        Self {
            registry,
            index_ref: IndexRef::new(),
            outer_ref_index,
            cache: IndexRef::new(),
        }
    }

    /// Собирает корень, используя общий реестр области: NodeRef-описание
    /// разрешается в объект, собранный более ранним merge этой же области.
    ///
    /// На внешнем merge update-раунда корреляционная таблица из описания
    /// пополняет кэш идентичности, и сборка идёт в исходные объекты.
    pub fn merge(&mut self, graphdef: &GraphDef, state: State) -> GraphResult<Object> {
        if let (Some(outer), Some(mapping)) =
            (&self.outer_ref_index, graphdef.index_mapping())
        {
            let additions = compose_mapping_reversed(outer, mapping);
            debug!("merge: кэш идентичности пополнен {} объектами", additions.len());
            self.cache.extend(additions);
        }
        if self.outer_ref_index.is_some() {
            unflatten(
                graphdef,
                state,
                self.registry,
                &mut self.index_ref,
                Some(&self.cache),
            )
        } else {
            unflatten(graphdef, state, self.registry, &mut self.index_ref, None)
        }
    }

    fn into_index_ref(self) -> IndexRef {
        self.index_ref
    }
}

/// Самостоятельная область разделения (без update-контекста).
pub fn split_context<R>(f: impl FnOnce(&mut SplitContext) -> R) -> R {
    let mut ctx = SplitContext::new(None);
    f(&mut ctx)
}

/// Самостоятельная область сборки (без update-контекста).
pub fn merge_context<R>(registry: &Registry, f: impl FnOnce(&mut MergeContext) -> R) -> R {
    let mut ctx = MergeContext::inner(registry);
    f(&mut ctx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Idle,
    OuterSplit,
    InnerMerge,
    InnerSplit,
}

/// Контекст одного раунда «разделить — пересечь границу — собрать обратно».
///
/// Последовательность областей: внешний `split_scope` (до границы),
/// внутри `pure` — `merge_scope` и снова `split_scope`, после границы —
/// внешний `merge_scope`, возвращающий исходные объекты с записанными
/// мутациями. После завершения раунда контекст готов к следующему.
pub struct UpdateContext {
    leg: Leg,
    outer_ref_index: Option<RefMap>,
    inner_index_ref: Option<IndexRef>,
}

impl UpdateContext {
    pub fn new() -> Self {
        Self {
            leg: Leg::Idle,
            outer_ref_index: None,
            inner_index_ref: None,
        }
    }

    /// Область разделения. До границы — внешняя (её карта запоминается),
    /// после внутреннего merge — внутренняя (подшивает корреляцию).
    pub fn split_scope<R>(&mut self, f: impl FnOnce(&mut SplitContext) -> R) -> R {
        match self.leg {
            Leg::Idle | Leg::OuterSplit => {
                let mut ctx = SplitContext::new(None);
                let result = f(&mut ctx);
                self.outer_ref_index = Some(ctx.into_ref_index());
                self.leg = Leg::OuterSplit;
                debug!("update-контекст: внешний split завершён");
                result
            }
            Leg::InnerMerge => {
                let mut ctx = SplitContext::new(self.inner_index_ref.take());
                let result = f(&mut ctx);
                self.leg = Leg::InnerSplit;
                debug!("update-контекст: внутренний split завершён");
                result
            }
            Leg::InnerSplit => {
                // повторный внутренний split без нового merge: корреляции нет
                let mut ctx = SplitContext::new(None);
                f(&mut ctx)
            }
        }
    }

    /// Область сборки. Внутри границы — внутренняя (её реестр запоминается),
    /// после внутреннего split — внешняя (собирает в исходные объекты
    /// и завершает раунд).
    pub fn merge_scope<R>(
        &mut self,
        registry: &Registry,
        f: impl FnOnce(&mut MergeContext) -> R,
    ) -> R {
        match self.leg {
            Leg::OuterSplit => {
                let mut ctx = MergeContext::inner(registry);
                let result = f(&mut ctx);
                self.inner_index_ref = Some(ctx.into_index_ref());
                self.leg = Leg::InnerMerge;
                debug!("update-контекст: внутренний merge завершён");
                result
            }
            Leg::InnerSplit => {
                let outer = self.outer_ref_index.take();
                let mut ctx = MergeContext::outer(registry, outer);
                let result = f(&mut ctx);
                self.leg = Leg::Idle;
                self.inner_index_ref = None;
                debug!("update-контекст: раунд завершён");
                result
            }
            Leg::Idle | Leg::InnerMerge => {
                let mut ctx = MergeContext::inner(registry);
                f(&mut ctx)
            }
        }
    }

    /// Выполняет функцию границы в свежей эпохе трассировки: мутация
    /// захваченных снаружи переменных внутри `f` падает с ошибкой эпохи.
    pub fn pure<R>(&mut self, f: impl FnOnce(&mut UpdateContext) -> R) -> R {
        trace::scope(|| f(self))
    }
}

impl Default for UpdateContext {
    fn default() -> Self {
        Self::new()
    }
}
