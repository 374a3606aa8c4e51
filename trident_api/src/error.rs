//! Structured error type for the orchestrator.
//!
//! Every failure the orchestrator can produce is attributed to one of five
//! kinds; the exit code is derived from the kind in exactly one
//! place (the CLI binary). Context messages and an optional source error can
//! be layered on as the error propagates back up through the step functions,
//! but the kind set at the error's origin never changes.

use std::{
    borrow::Cow,
    fmt::{Debug, Write},
    panic::Location,
};

use serde::{ser::SerializeStruct, Serialize};

/// The five failure kinds the orchestrator distinguishes by, not by message
/// text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Kind {
    /// Invalid configuration or a missing required flag.
    OperatorError,
    /// Not privileged, a required external tool is missing, or the target
    /// device fails a precondition (e.g. too small).
    Precondition,
    /// A network fetch failed, a device was busy, or a lock was contended.
    Transient,
    /// An OCI manifest or cache digest mismatch, or an incomplete
    /// extraction.
    Corruption,
    /// An invariant was broken mid-operation. Cleanup was attempted; the
    /// operator may need to be told not to reboot.
    Fatal,
}

impl Kind {
    /// Process exit code for this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Kind::OperatorError => 1,
            Kind::Precondition => 2,
            Kind::Transient => 3,
            Kind::Corruption => 4,
            Kind::Fatal => 4,
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(<&str>::from(self))
    }
}

struct TridentErrorInner {
    kind: Kind,
    message: Cow<'static, str>,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

/// A failure attributed to one [`Kind`], carrying the call-site location it
/// originated at plus any context messages layered on as it propagated.
pub struct TridentError(Box<TridentErrorInner>);

impl TridentError {
    #[track_caller]
    pub fn new(kind: Kind, message: impl Into<Cow<'static, str>>) -> Self {
        TridentError(Box::new(TridentErrorInner {
            kind,
            message: message.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn with_source(
        kind: Kind,
        message: impl Into<Cow<'static, str>>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        TridentError(Box::new(TridentErrorInner {
            kind,
            message: message.into(),
            location: Location::caller(),
            source: Some(source.into()),
            context: Vec::new(),
        }))
    }

    pub fn kind(&self) -> Kind {
        self.0.kind
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }
}

/// Attach a [`Kind`] to a failing [`Result`] or a `None` [`Option`], turning
/// it into a [`TridentError`] at the point the error is first recognized.
pub trait ReportError<T> {
    fn structured(
        self,
        kind: Kind,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<T, TridentError>;
}

impl<T> ReportError<T> for Option<T> {
    #[track_caller]
    fn structured(
        self,
        kind: Kind,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<T, TridentError> {
        self.ok_or_else(|| TridentError::new(kind, message))
    }
}

impl<T, E> ReportError<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    #[track_caller]
    fn structured(
        self,
        kind: Kind,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<T, TridentError> {
        self.map_err(|e| TridentError::with_source(kind, message, e))
    }
}

/// Attach a plain context message to an already-structured error, without
/// changing its [`Kind`].
pub trait TridentResultExt<T> {
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, TridentError>;
}

impl<T> TridentResultExt<T> for Result<T, TridentError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, TridentError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

impl Serialize for TridentError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("trident-error", 4)?;
        state.serialize_field("kind", <&str>::from(&self.0.kind))?;
        state.serialize_field("message", &self.0.message)?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        state.serialize_field(
            "cause",
            &self.0.source.as_ref().map(|e| format!("{e:?}")),
        )?;
        state.end()
    }
}

impl Debug for TridentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} at {}:{}",
            self.0.kind,
            self.0.message,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                write!(f, "{i: >5}: {context}")?;
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{index: >5}: ")?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for TridentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.0.kind, self.0.message)
    }
}

impl std::error::Error for TridentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source.as_ref().map(|e| e.as_ref() as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(Kind::OperatorError.exit_code(), 1);
        assert_eq!(Kind::Precondition.exit_code(), 2);
        assert_eq!(Kind::Transient.exit_code(), 3);
        assert_eq!(Kind::Corruption.exit_code(), 4);
        assert_eq!(Kind::Fatal.exit_code(), 4);
    }

    #[test]
    fn structured_preserves_kind_through_context() {
        let err: Result<(), TridentError> = Err(anyhow::anyhow!("boom"))
            .structured(Kind::Transient, "fetching manifest")
            .message("while resolving image reference");
        let err = err.unwrap_err();
        assert_eq!(err.kind(), Kind::Transient);
        assert!(format!("{err:?}").contains("while resolving image reference"));
        assert!(format!("{err:?}").contains("boom"));
    }

    #[test]
    fn serializes_for_json_reporter() {
        let err = TridentError::new(Kind::OperatorError, "missing --image");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "operator-error");
        assert_eq!(value["message"], "missing --image");
    }
}
