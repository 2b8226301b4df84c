//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl uses an older miette version, so we need to extract offset/len manually
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "socket-path" => {
                let path = string_arg(node)?;
                config.client.socket_path =
                    Some(shellexpand::tilde(path).into_owned().into());
            }
            "log-level" => {
                config.log_level = string_arg(node)?
                    .parse()
                    .map_err(|message| ConfigError::Invalid { message })?;
            }
            "event-buffer" => {
                config.client.event_buffer = bounded_arg(node, MAX_EVENT_BUFFER)?;
            }
            "reconnect" => {
                config.client.reconnect = parse_reconnect(node)?;
            }
            "send-queue" => {
                config.client.send_queue = parse_send_queue(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_reconnect(node: &kdl::KdlNode) -> Result<ReconnectPolicy, ConfigError> {
    let mut policy = ReconnectPolicy::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "initial-delay-ms" => policy.initial_delay_ms = positive_arg(child)?,
                "max-delay-ms" => policy.max_delay_ms = positive_arg(child)?,
                "max-retries" => {
                    let retries = integer_arg(child)?;
                    let retries = u32::try_from(retries).map_err(|_| ConfigError::Invalid {
                        message: format!("max-retries must be between 0 and {}", u32::MAX),
                    })?;
                    policy.max_retries = Some(retries);
                }
                name => {
                    tracing::warn!("Unknown reconnect option: {}", name);
                }
            }
        }
    }

    if policy.max_delay_ms < policy.initial_delay_ms {
        return Err(ConfigError::Invalid {
            message: format!(
                "reconnect max-delay-ms ({}) must not be smaller than initial-delay-ms ({})",
                policy.max_delay_ms, policy.initial_delay_ms
            ),
        });
    }

    Ok(policy)
}

fn parse_send_queue(node: &kdl::KdlNode) -> Result<SendQueueConfig, ConfigError> {
    let mut queue = SendQueueConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "policy" => {
                    queue.policy = string_arg(child)?
                        .parse()
                        .map_err(|message| ConfigError::Invalid { message })?;
                }
                "capacity" => queue.capacity = bounded_arg(child, MAX_SEND_QUEUE_CAPACITY)?,
                name => {
                    tracing::warn!("Unknown send-queue option: {}", name);
                }
            }
        }
    }

    Ok(queue)
}

fn string_arg(node: &kdl::KdlNode) -> Result<&str, ConfigError> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("{} expects a string argument", node.name().value()),
        })
}

fn integer_arg(node: &kdl::KdlNode) -> Result<i64, ConfigError> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_i64())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("{} expects an integer argument", node.name().value()),
        })
}

fn positive_arg(node: &kdl::KdlNode) -> Result<u64, ConfigError> {
    let value = integer_arg(node)?;
    if value <= 0 {
        return Err(ConfigError::Invalid {
            message: format!(
                "{} must be greater than zero, got {}",
                node.name().value(),
                value
            ),
        });
    }
    Ok(value as u64)
}

fn bounded_arg(node: &kdl::KdlNode, max: usize) -> Result<usize, ConfigError> {
    let value = positive_arg(node)?;
    match usize::try_from(value) {
        Ok(value) if value <= max => Ok(value),
        _ => Err(ConfigError::Invalid {
            message: format!(
                "{} must be at most {}, got {}",
                node.name().value(),
                max,
                value
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_full_config() {
        let config = r#"
            socket-path "/run/iron-pi/driver.sock"
            log-level "debug"
            event-buffer 32

            reconnect {
                initial-delay-ms 100
                max-delay-ms 2000
                max-retries 7
            }

            send-queue {
                policy "drop"
                capacity 8
            }
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.log_level, LogLevel::Debug);
        assert_eq!(
            result.client.socket_path,
            Some(PathBuf::from("/run/iron-pi/driver.sock"))
        );
        assert_eq!(result.client.event_buffer, 32);
        assert_eq!(
            result.client.reconnect,
            ReconnectPolicy {
                initial_delay_ms: 100,
                max_delay_ms: 2000,
                max_retries: Some(7),
            }
        );
        assert_eq!(result.client.send_queue.policy, SendPolicy::Drop);
        assert_eq!(result.client.send_queue.capacity, 8);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let result = parse_config_str("").unwrap();
        assert_eq!(result.log_level, LogLevel::Info);
        assert_eq!(result.client, ClientConfig::default());
        assert_eq!(result.client.reconnect.max_retries, None);
        assert_eq!(
            result.client.resolved_socket_path(),
            PathBuf::from(UNIX_SOCKET_PATH)
        );
    }

    #[test]
    fn test_partial_reconnect_block_keeps_other_defaults() {
        let config = r#"
            reconnect {
                max-retries 0
            }
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.client.reconnect.max_retries, Some(0));
        assert_eq!(
            result.client.reconnect.initial_delay_ms,
            DEFAULT_INITIAL_DELAY_MS
        );
        assert_eq!(result.client.reconnect.max_delay_ms, DEFAULT_MAX_DELAY_MS);
    }

    #[test]
    fn test_unknown_nodes_are_ignored() {
        let config = r#"
            flux-capacitor "on"
            reconnect {
                warp-factor 9
            }
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.client, ClientConfig::default());
    }

    #[test]
    fn test_max_delay_smaller_than_initial_rejected() {
        let config = r#"
            reconnect {
                initial-delay-ms 5000
                max-delay-ms 1000
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::Invalid { message } => {
                assert!(message.contains("max-delay-ms"), "message: {}", message);
            }
            other => panic!("Expected Invalid error, got: {:?}", other),
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = r#"
            send-queue {
                capacity 0
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_capacity_above_limit_rejected() {
        let config = r#"
            send-queue {
                capacity 9223372036854775807
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("capacity must be at most"));
    }

    #[test]
    fn test_capacity_at_limit_accepted() {
        let config = format!("send-queue {{\n capacity {}\n}}\n", MAX_SEND_QUEUE_CAPACITY);
        let result = parse_config_str(&config).unwrap();
        assert_eq!(result.client.send_queue.capacity, MAX_SEND_QUEUE_CAPACITY);
    }

    #[test]
    fn test_event_buffer_limits() {
        let at_limit = format!("event-buffer {}", MAX_EVENT_BUFFER);
        assert_eq!(
            parse_config_str(&at_limit).unwrap().client.event_buffer,
            MAX_EVENT_BUFFER
        );

        let over = format!("event-buffer {}", MAX_EVENT_BUFFER + 1);
        assert!(matches!(
            parse_config_str(&over),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse_config_str("event-buffer 0"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let config = r#"
            send-queue {
                policy "sometimes"
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        assert!(err.to_string().contains("sometimes"));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let err = parse_config_str(r#"log-level "chatty""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_socket_path_requires_string() {
        let err = parse_config_str("socket-path 42").unwrap_err();
        assert!(err.to_string().contains("socket-path"));
    }

    #[test]
    fn test_negative_max_retries_rejected() {
        let config = r#"
            reconnect {
                max-retries -1
            }
        "#;

        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_syntax_error_reports_parse_error() {
        let err = parse_config_str("reconnect {").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_parse_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("client.kdl");
        std::fs::write(&path, "event-buffer 16\n").unwrap();

        let result = parse_config(&path).unwrap();
        assert_eq!(result.client.event_buffer, 16);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = parse_config(Path::new("/nonexistent/iron-pi/client.kdl"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
