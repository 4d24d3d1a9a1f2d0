use miette::{Diagnostic, LabeledSpan, SourceSpan};

use crate::analyzer::AnalyzeError;
use crate::expr::ParseError;
use crate::runtime::error::RuntimeError;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InnerError {
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Represents a high-level error with diagnostic information for the user.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("{cause}")]
pub struct Error {
    /// The underlying cause of the error.
    pub cause: InnerError,
    /// The script text related to the error.
    pub source_code: String,
    /// The location in the script for diagnostics.
    pub location: SourceSpan,
}

impl Error {
    pub fn from_error(source_code: impl Into<String>, cause: InnerError) -> Self {
        let source_code = source_code.into();
        let location = match &cause {
            InnerError::Analyze(AnalyzeError::MalformedDefinition { line }) => {
                let offset = source_code.find(line.trim()).unwrap_or(0);
                SourceSpan::new(offset.into(), line.trim().len().max(1))
            }
            InnerError::Parse(ParseError::UnexpectedToken { offset, fragment })
            | InnerError::Parse(ParseError::TrailingInput { offset, fragment }) => {
                SourceSpan::new((*offset).into(), fragment.len().max(1))
            }
            InnerError::Runtime(RuntimeError::BadDefinition { name, .. })
            | InnerError::Runtime(RuntimeError::UnknownQuantity(name))
            | InnerError::Runtime(RuntimeError::NotAssignable(name))
            | InnerError::Runtime(RuntimeError::CyclicEvaluation(name))
            | InnerError::Runtime(RuntimeError::FunctionReference(name)) => {
                let offset = source_code.find(name.as_str()).unwrap_or(0);
                SourceSpan::new(offset.into(), name.len().max(1))
            }
            _ => SourceSpan::new(0.into(), source_code.len().min(1)),
        };
        Self {
            cause,
            source_code,
            location,
        }
    }
}

impl Diagnostic for Error {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let c = match &self.cause {
            InnerError::Analyze(AnalyzeError::MalformedDefinition { .. }) => {
                "AnalyzeError::MalformedDefinition"
            }
            InnerError::Analyze(AnalyzeError::InvariantViolation(_)) => {
                "AnalyzeError::InvariantViolation"
            }
            InnerError::Parse(ParseError::UnexpectedToken { .. }) => "ParseError::UnexpectedToken",
            InnerError::Parse(ParseError::TrailingInput { .. }) => "ParseError::TrailingInput",
            InnerError::Parse(ParseError::UnexpectedEof) => "ParseError::UnexpectedEof",
            InnerError::Runtime(RuntimeError::UnknownQuantity(_)) => {
                "RuntimeError::UnknownQuantity"
            }
            InnerError::Runtime(RuntimeError::NotAssignable(_)) => "RuntimeError::NotAssignable",
            InnerError::Runtime(RuntimeError::CyclicEvaluation(_)) => {
                "RuntimeError::CyclicEvaluation"
            }
            InnerError::Runtime(RuntimeError::FunctionReference(_)) => {
                "RuntimeError::FunctionReference"
            }
            InnerError::Runtime(RuntimeError::InvalidNumberOfArguments(_, _, _)) => {
                "RuntimeError::InvalidNumberOfArguments"
            }
            InnerError::Runtime(RuntimeError::InvalidCombiner(_)) => {
                "RuntimeError::InvalidCombiner"
            }
            InnerError::Runtime(RuntimeError::BadDefinition { .. }) => {
                "RuntimeError::BadDefinition"
            }
        };
        Some(Box::new(c))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let msg = match &self.cause {
            InnerError::Analyze(AnalyzeError::MalformedDefinition { .. }) => {
                Some("Each line must be `name = definition`, optionally with `(parameters)` and a `; unit` suffix.")
            }
            InnerError::Parse(ParseError::UnexpectedToken { .. })
            | InnerError::Parse(ParseError::TrailingInput { .. }) => {
                Some("Check for syntax errors or misplaced tokens in the definition.")
            }
            InnerError::Parse(ParseError::UnexpectedEof) => {
                Some("The definition ended unexpectedly. Check for missing closing brackets or operands.")
            }
            InnerError::Runtime(RuntimeError::UnknownQuantity(_)) => {
                Some("The name is not defined in this script.")
            }
            InnerError::Runtime(RuntimeError::NotAssignable(_)) => {
                Some("Only parameterless quantities can be assigned a value.")
            }
            InnerError::Runtime(RuntimeError::CyclicEvaluation(_)) => {
                Some("Break the cycle, or use `name @ 1` to refer to the previous step's value.")
            }
            InnerError::Runtime(RuntimeError::FunctionReference(_)) => {
                Some("Call the function with arguments instead of referring to it by name.")
            }
            _ => None,
        };
        msg.map(|msg| Box::new(msg) as Box<dyn std::fmt::Display>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            Some("here".to_string()),
            self.location,
        ))))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.source_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locates_malformed_line() {
        let source = "a = 1\nnonsense line\nb = 2";
        let error = Error::from_error(
            source,
            InnerError::Analyze(AnalyzeError::MalformedDefinition {
                line: "nonsense line".to_string(),
            }),
        );
        assert_eq!(error.location.offset(), 6);
        assert_eq!(error.location.len(), 13);
    }

    #[test]
    fn test_code_and_help_present() {
        let error = Error::from_error(
            "a = ",
            InnerError::Parse(ParseError::UnexpectedEof),
        );
        assert_eq!(error.code().map(|c| c.to_string()).as_deref(), Some("ParseError::UnexpectedEof"));
        assert!(error.help().is_some());
    }
}
