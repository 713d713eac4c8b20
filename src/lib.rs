//! # RustyOSG: Object State Graph engine in Rust
//!
//! **RustyOSG** is the state-management core of a graph-based neural network
//! library. Its key feature is the **Object State Graph**: a live, mutable,
//! reference-sharing (and possibly cyclic) graph of modules and variables
//! that can be flattened into an immutable `(GraphDef, State)` pair, carried
//! across a pure-functional boundary (tracing, compilation, parallel
//! mapping) and reconstructed back — preserving object identity and shared
//! references.
//!
//! ## Usage Example
//!
//! ```no_run
//! use rustyosg::graph::{merge, split, NodeHandle, Object};
//! use rustyosg::value::Value;
//! use rustyosg::variable::Variable;
//!
//! // One shared parameter referenced from two slots.
//! let w = Variable::param(Value::ScalarF32(1.0));
//! let model = NodeHandle::list(vec![
//!     Object::Variable(w.clone()),
//!     Object::Variable(w),
//! ]);
//!
//! // Flatten: the shared variable contributes exactly one state entry.
//! let (graphdef, state) = split(&Object::Node(model)).unwrap();
//! assert_eq!(state.len(), 1);
//!
//! // Reconstruct: both slots point at one shared variable again.
//! let restored = merge(&graphdef, state).unwrap();
//! ```
//!
//! The numerical engine (kernels, autodiff, devices) is an external
//! collaborator: this crate only carries opaque [`value::Value`] leaves.

// Declare public modules that constitute the core library API.
pub mod graph;
pub mod registry;
pub mod serialization;
pub mod trace;
pub mod value;
pub mod variable;
