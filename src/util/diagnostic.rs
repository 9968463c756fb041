//! User-facing diagnostics.
//!
//! Every failure shown to a user is a `miette` diagnostic: binding failures
//! come through [`BindDiagnostic`], malformed manifests through
//! [`ManifestSyntaxError`] and unmet matrix requirements through
//! [`MissingHalError`]. All of them print with [`render`].

use std::fmt;

use miette::{
    Diagnostic as MietteDiagnostic, GraphicalReportHandler, GraphicalTheme, NamedSource,
    SourceSpan,
};
use thiserror::Error;

/// Terminal width used when rendering.
const RENDER_WIDTH: usize = 120;

/// Common suggestion messages.
pub mod suggestions {
    pub const NOT_DECLARED: &str =
        "declare the instance in the device manifest (vendor/etc/vintf/manifest.toml)";

    pub const LIST_INSTANCES: &str = "run `halbind instances <package@M.m::Interface>` to see what is declared";

    pub const CHECK_ROOT: &str = "check that `--root` points at the device image";

    pub const START_SERVICE: &str = "make sure the service process is running and registered";

    pub const LOAD_BRIDGE: &str = "configure `[bridge] library` so a native bridge is loaded";

    pub const UPGRADE_BRIDGE: &str = "use a native bridge implementing callbacks version 2 or later";

    pub const FIX_SYNTAX: &str =
        "each `[[hal]]` table needs a `name` and either `fqnames` or `versions` with `[[hal.interface]]` tables";
}

/// A failed lookup or bind, as shown to the user.
///
/// `facts` are what halbind observed; `suggestions` are what the user can change.
#[derive(Debug, Clone, Error)]
pub struct BindDiagnostic {
    pub code: &'static str,
    pub message: String,
    pub facts: Vec<String>,
    pub suggestions: Vec<String>,
}

impl BindDiagnostic {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        BindDiagnostic {
            code,
            message: message.into(),
            facts: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn fact(mut self, fact: impl Into<String>) -> Self {
        self.facts.push(fact.into());
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

impl fmt::Display for BindDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for fact in &self.facts {
            write!(f, "\n{}", fact)?;
        }
        Ok(())
    }
}

impl MietteDiagnostic for BindDiagnostic {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        match self.suggestions.as_slice() {
            [] => None,
            [only] => Some(Box::new(only)),
            many => Some(Box::new(
                many.iter()
                    .enumerate()
                    .map(|(i, s)| format!("{}. {}", i + 1, s))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )),
        }
    }
}

/// A manifest or matrix that is not valid TOML for its schema.
#[derive(Debug, Error, MietteDiagnostic)]
#[error("failed to parse {origin}: {message}")]
#[diagnostic(code(halbind::manifest::syntax))]
pub struct ManifestSyntaxError {
    pub origin: String,
    pub message: String,
    #[source_code]
    pub src: NamedSource<String>,
    #[label("here")]
    pub span: Option<SourceSpan>,
    #[help]
    pub suggestion: Option<String>,
}

impl ManifestSyntaxError {
    pub fn from_toml(origin: &str, content: &str, err: &toml::de::Error) -> Self {
        ManifestSyntaxError {
            origin: origin.to_string(),
            message: err.message().to_string(),
            src: NamedSource::new(origin, content.to_string()),
            span: err.span().map(SourceSpan::from),
            suggestion: Some(suggestions::FIX_SYNTAX.to_string()),
        }
    }
}

/// A matrix requirement the device manifest does not meet.
#[derive(Debug, Error, MietteDiagnostic)]
#[error("device manifest does not serve `{hal}`")]
#[diagnostic(code(halbind::check::missing_hal))]
pub struct MissingHalError {
    pub hal: String,
    #[help]
    pub suggestion: Option<String>,
}

/// Render a diagnostic for the terminal.
pub fn render(diagnostic: &dyn MietteDiagnostic, color: bool) -> String {
    let theme = if color {
        GraphicalTheme::unicode()
    } else {
        GraphicalTheme::unicode_nocolor()
    };
    let handler = GraphicalReportHandler::new_themed(theme).with_width(RENDER_WIDTH);

    let mut out = String::new();
    if handler.render_report(&mut out, diagnostic).is_err() {
        out = format!("error: {}\n", diagnostic);
    }
    out
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &dyn MietteDiagnostic, color: bool) {
    eprint!("{}", render(diagnostic, color));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_diagnostic_rendering() {
        let diag = BindDiagnostic::new("halbind::bind::not_declared", "no HAL serves `IFoo/default`")
            .fact("device manifest declares foo@2.0")
            .suggest(suggestions::CHECK_ROOT)
            .suggest(suggestions::START_SERVICE);

        let output = render(&diag, false);
        assert!(output.contains("halbind::bind::not_declared"));
        assert!(output.contains("no HAL serves"));
        assert!(output.contains("device manifest declares foo@2.0"));
        assert!(output.contains("1. check that `--root`"));
        assert!(output.contains("2. make sure the service"));
    }

    #[test]
    fn test_single_suggestion_is_not_numbered() {
        let diag = BindDiagnostic::new("halbind::bind::dead_object", "service is dead")
            .suggest(suggestions::START_SERVICE);
        let help = diag.help().map(|h| h.to_string());
        assert_eq!(help.as_deref(), Some(suggestions::START_SERVICE));
    }

    #[test]
    fn test_syntax_error_carries_span() {
        let content = "type = \"device\"\n[[hal]\n";
        let err = toml::from_str::<toml::Value>(content).unwrap_err();
        let diag = ManifestSyntaxError::from_toml("manifest.toml", content, &err);
        assert_eq!(diag.origin, "manifest.toml");
        assert!(diag.span.is_some());
        assert!(diag.to_string().starts_with("failed to parse manifest.toml"));

        let output = render(&diag, false);
        assert!(output.contains("halbind::manifest::syntax"));
        assert!(output.contains("[[hal]"));
    }
}
