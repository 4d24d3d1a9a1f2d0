//! `qm-lang` provides the analyser and reactive runtime for quantity
//! scripts: declarative, spreadsheet-style models where every line defines
//! a named quantity in terms of others.
//!
//! ## Examples
//!
//! ```rs
//! use qm_lang::Session;
//!
//! let mut session = Session::new();
//! session.analyse_script("
//!     mass = 25 ; kg
//!     accel = 9.81 ; m/s2
//!     force = mass * accel
//! ").unwrap();
//!
//! let force = session.get_value("force").unwrap();
//! assert_eq!(force.to_string(), "245.25 kg.m/s2");
//!
//! // Definitions can reference names that do not exist yet; they become
//! // todo placeholders until defined.
//! session.analyse_line("energy = force * distance").unwrap();
//! assert_eq!(session.todos(), vec!["distance".into()]);
//! ```
pub mod analyzer;
pub mod error;
pub mod expr;
pub mod guard;
mod ident;
mod number;
pub mod quantity;
pub mod runtime;
pub mod session;
pub mod unit;

pub use analyzer::{Analysis, AnalyzeError, TIME_DEPENDENT_PRIMITIVES};
pub use error::{Error, InnerError};
pub use expr::Expr;
pub use ident::Ident;
pub use number::Number;
pub use quantity::{Category, InputKind, Quantity, QuantityMap};
pub use runtime::error::RuntimeError;
pub use runtime::{Options as RuntimeOptions, PlotSample, Pointer, Runtime};
pub use session::{Change, Session};
pub use unit::{UnitError, UnitSpec, UnitValue, Units, Value};
