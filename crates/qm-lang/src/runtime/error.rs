use thiserror::Error;

use crate::expr::ParseError;

type QuantityName = String;

#[derive(Error, Debug, PartialEq)]
pub enum RuntimeError {
    #[error("\"{0}\" is not a known quantity")]
    UnknownQuantity(QuantityName),
    #[error("\"{0}\" is a function and cannot be assigned a value")]
    NotAssignable(QuantityName),
    #[error("Evaluation of \"{0}\" exceeded the call depth limit; the definitions are likely cyclic")]
    CyclicEvaluation(QuantityName),
    #[error("\"{0}\" takes arguments and cannot be read as a plain value")]
    FunctionReference(QuantityName),
    #[error("Invalid number of arguments in \"{0}\", expected {1}, got {2}")]
    InvalidNumberOfArguments(QuantityName, u8, u8),
    #[error("\"{0}\" cannot be used as a fold combiner")]
    InvalidCombiner(QuantityName),
    #[error("Definition of \"{name}\" does not parse")]
    BadDefinition {
        name: QuantityName,
        #[source]
        source: ParseError,
    },
}
