use serde_json::error::Category;

use crate::{
    core::topology::Topology,
    ports::topology_parser::{ParseError, TopologyParser, TopologyWriter, WriteError},
};

/// JSON topology descriptors.
///
/// Truncated or syntactically broken content is reported as transient, since
/// that is what a file caught mid-write looks like. Well-formed JSON with the
/// wrong shape is permanent.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTopologyCodec;

impl TopologyParser for JsonTopologyCodec {
    fn parse(&self, content: &[u8]) -> Result<Topology, ParseError> {
        serde_json::from_slice(content).map_err(|e| match e.classify() {
            Category::Eof | Category::Syntax | Category::Io => ParseError::Transient(e.to_string()),
            Category::Data => ParseError::Permanent(e.to_string()),
        })
    }
}

impl TopologyWriter for JsonTopologyCodec {
    fn extension(&self) -> &str {
        "json"
    }

    fn write(&self, topology: &Topology) -> Result<Vec<u8>, WriteError> {
        serde_json::to_vec_pretty(topology).map_err(|e| WriteError::Serialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topology::{Provider, Service, Version};

    const SANDBOX: &str = r#"{
        "default_service_path": "webhdfs",
        "providers": [
            {
                "role": "authentication",
                "name": "ShiroProvider",
                "params": { "sessionTimeout": "30", "urls./**": "authcBasic" }
            }
        ],
        "services": [
            {
                "role": "WEBHDFS",
                "urls": ["http://localhost:50070/webhdfs"]
            },
            {
                "role": "HIVE",
                "name": "hive",
                "version": "0.13.0",
                "urls": ["http://localhost:10001/cliservice"]
            }
        ],
        "applications": [{ "name": "admin-ui" }]
    }"#;

    #[test]
    fn test_parse_descriptor() {
        let topology = JsonTopologyCodec.parse(SANDBOX.as_bytes()).unwrap();
        assert!(topology.name.is_empty());
        assert_eq!(topology.default_service_path.as_deref(), Some("webhdfs"));
        let shiro = topology.provider("authentication", None).unwrap();
        assert!(shiro.enabled);
        assert_eq!(shiro.params.get("sessionTimeout"), Some("30"));
        assert!(
            topology
                .service("HIVE", Some("hive"), Some(&Version::new(0, 13, 0)))
                .is_some()
        );
        assert_eq!(topology.applications[0].role(), "admin-ui");
    }

    #[test]
    fn test_truncated_content_is_transient() {
        let truncated = &SANDBOX.as_bytes()[..SANDBOX.len() / 2];
        assert!(JsonTopologyCodec.parse(truncated).unwrap_err().is_transient());
        assert!(JsonTopologyCodec.parse(b"").unwrap_err().is_transient());
    }

    #[test]
    fn test_wrong_shape_is_permanent() {
        let err = JsonTopologyCodec
            .parse(br#"{"services": [{"urls": ["http://x"]}]}"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::Permanent(_)));
    }

    #[test]
    fn test_written_descriptor_parses_back() {
        let topology = Topology::new("sandbox")
            .with_provider(Provider::new("authentication", "Anonymous"))
            .with_service(Service::new("WEBHDFS").with_url("http://localhost:50070/webhdfs"));
        let bytes = JsonTopologyCodec.write(&topology).unwrap();
        assert_eq!(JsonTopologyCodec.parse(&bytes).unwrap(), topology);
        assert_eq!(JsonTopologyCodec.extension(), "json");
    }
}
