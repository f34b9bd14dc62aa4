use bridge_mapping::MappingError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse HL7 message: {0}")]
    Hl7(#[from] hl7::Hl7Error),
    #[error("failed to read FHIR input: {0}")]
    Fhir(#[from] fhir::FhirError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("cannot detect the {0} of the input; supply a rule hint")]
    Undetectable(&'static str),

    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),
    #[error("unknown alert '{0}'")]
    UnknownAlert(String),
    #[error("alert '{id}' was already acknowledged by {by}")]
    AlertAlreadyAcknowledged { id: String, by: String },

    #[error("failed to read {path}: {source}", path = path.display())]
    FileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(String),
    #[error("background task failed: {0}")]
    Task(String),
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_hl7(raw: &[u8]) -> BridgeResult<hl7::Hl7Message> {
        Ok(hl7::parse(raw)?)
    }

    #[test]
    fn lower_level_errors_convert() {
        match parse_hl7(b"") {
            Err(BridgeError::Hl7(_)) => {}
            other => panic!("expected Hl7 error, got {other:?}"),
        }
    }

    #[test]
    fn messages_name_the_offending_item() {
        assert_eq!(
            BridgeError::Undetectable("version").to_string(),
            "cannot detect the version of the input; supply a rule hint"
        );
        let err = BridgeError::AlertAlreadyAcknowledged {
            id: "a1".into(),
            by: "ops.budi".into(),
        };
        assert_eq!(err.to_string(), "alert 'a1' was already acknowledged by ops.budi");
        let err = BridgeError::FileRead {
            path: "/etc/bridge/endpoints.yaml".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("failed to read /etc/bridge/endpoints.yaml: "));
    }
}
