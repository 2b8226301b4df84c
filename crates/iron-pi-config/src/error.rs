//! Configuration errors, rendered through miette

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    /// The file is not valid KDL
    #[error("Failed to parse KDL")]
    #[diagnostic(
        code(iron_pi::config::parse_error),
        help("client.kdl holds top-level nodes such as `socket-path \"/tmp/socket-iron-pi\"` and blocks such as `reconnect {{ max-retries 5 }}`; check quoting and braces near the marked position")
    )]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    /// Well-formed KDL with a value the client cannot use
    #[error("Invalid configuration: {message}")]
    #[diagnostic(
        code(iron_pi::config::invalid),
        help("see `iron-pi config` for the effective values and their defaults")
    )]
    Invalid { message: String },

    #[error("IO error: {0}")]
    #[diagnostic(code(iron_pi::config::io))]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use crate::parse_config_str;
    use miette::Diagnostic;

    #[test]
    fn test_parse_error_carries_help_and_label() {
        let err = parse_config_str("reconnect { max-retries 5").unwrap_err();

        let help = err.help().map(|h| h.to_string()).unwrap_or_default();
        assert!(help.contains("socket-path"), "help: {}", help);
        assert!(help.contains("reconnect { max-retries 5 }"), "help: {}", help);

        let labels: Vec<_> = err.labels().into_iter().flatten().collect();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].label(), Some("here"));
    }

    #[test]
    fn test_diagnostic_codes() {
        let err = parse_config_str("event-buffer 0").unwrap_err();
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("iron_pi::config::invalid"));
        assert!(err.help().is_some());
    }
}
