//! Значения-листья: непрозрачные данные внешнего численного движка.
//!
//! Ядро графовой машинерии никогда не заглядывает внутрь `Value` — оно лишь
//! переносит его между живым графом и плоским `State`. Набор вариантов
//! закрытый: именно он и есть предикат «это массивоподобный лист».

use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Форма тензора
pub type Shape = Vec<usize>;

pub type ValueResult<T> = std::result::Result<T, ValueError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("Операция с осями неприменима к скаляру")]
    ScalarAxis,
    #[error("Неверная ось {0} для формы {1:?}")]
    InvalidAxis(usize, Shape),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    I32,
    Bool,
}

/// Лист графа: тензор или скаляр.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(ArrayD<f32>),
    ScalarF32(f32),
    ScalarI32(i32),
    ScalarBool(bool),
}

impl Value {
    pub fn shape(&self) -> Shape {
        match self {
            Value::Tensor(arr) => arr.shape().to_vec(),
            _ => vec![],
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Value::Tensor(_) | Value::ScalarF32(_) => DType::F32,
            Value::ScalarI32(_) => DType::I32,
            Value::ScalarBool(_) => DType::Bool,
        }
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Value::Tensor(_))
    }

    /// Вставляет новую ось длины 1 на позицию `axis`.
    ///
    /// Используется add-axis-хуками переменных, когда батчирующая
    /// трансформация добавляет ведущее измерение.
    pub fn insert_axis(&self, axis: usize) -> ValueResult<Value> {
        match self {
            Value::Tensor(arr) => {
                if axis > arr.ndim() {
                    return Err(ValueError::InvalidAxis(axis, arr.shape().to_vec()));
                }
                Ok(Value::Tensor(arr.clone().insert_axis(Axis(axis))))
            }
            _ => Err(ValueError::ScalarAxis),
        }
    }

    /// Убирает ось `axis`, оставляя нулевой срез по ней.
    pub fn remove_axis(&self, axis: usize) -> ValueResult<Value> {
        match self {
            Value::Tensor(arr) => {
                if axis >= arr.ndim() {
                    return Err(ValueError::InvalidAxis(axis, arr.shape().to_vec()));
                }
                Ok(Value::Tensor(arr.index_axis(Axis(axis), 0).to_owned()))
            }
            _ => Err(ValueError::ScalarAxis),
        }
    }
}
