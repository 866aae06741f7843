use crate::types::{Document, ErrorCode, FieldError, HostAndPort, HostAndPortParseError, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

pub const MAJORITY_WRITE_MODE: &str = "majority";

const DEFAULT_ELECTION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("member host is invalid: {0}")]
    Host(#[from] HostAndPortParseError),
    #[error("invalid replica set config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::Field(_) | ConfigError::Host(_) => ErrorCode::FailedToParse,
            ConfigError::Invalid(_) => ErrorCode::InvalidReplicaSetConfig,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberConfig {
    pub id: i64,
    pub host: HostAndPort,
    pub priority: f64,
    pub votes: i64,
    pub arbiter_only: bool,
    pub hidden: bool,
    pub slave_delay: Duration,
    pub tags: BTreeMap<String, String>,
}

impl MemberConfig {
    pub fn new(id: i64, host: HostAndPort) -> Self {
        MemberConfig {
            id,
            host,
            priority: 1.0,
            votes: 1,
            arbiter_only: false,
            hidden: false,
            slave_delay: Duration::from_secs(0),
            tags: BTreeMap::new(),
        }
    }

    pub fn is_voter(&self) -> bool {
        self.votes > 0
    }

    pub fn is_electable(&self) -> bool {
        !self.arbiter_only && self.priority > 0.0
    }

    /// Arbiters vote but hold no data, so they never count toward durability.
    pub fn is_data_bearing(&self) -> bool {
        !self.arbiter_only
    }

    fn parse(doc: &Document) -> Result<Self, ConfigError> {
        let id = doc.require_i64("_id")?;
        let host = doc.require_str("host")?.parse::<HostAndPort>()?;
        let arbiter_only = doc.get_bool("arbiterOnly").unwrap_or(false);
        let priority = match doc.get("priority") {
            None => {
                if arbiter_only {
                    0.0
                } else {
                    1.0
                }
            }
            Some(Value::Double(p)) => *p,
            Some(other) => other.as_i64().map(|p| p as f64).ok_or_else(|| {
                FieldError::TypeMismatch {
                    field: "priority".into(),
                    expected: "number",
                    found: other.type_name(),
                }
            })?,
        };
        let votes = doc.get_i64("votes").unwrap_or(1);
        let hidden = doc.get_bool("hidden").unwrap_or(false);
        let slave_delay = Duration::from_secs(doc.get_i64("slaveDelay").unwrap_or(0).max(0) as u64);

        let mut tags = BTreeMap::new();
        if let Some(tag_doc) = doc.get_document("tags") {
            for (key, value) in tag_doc.iter() {
                match value {
                    Value::String(s) => {
                        tags.insert(key.to_string(), s.clone());
                    }
                    other => {
                        return Err(ConfigError::Field(FieldError::TypeMismatch {
                            field: format!("tags.{}", key),
                            expected: "string",
                            found: other.type_name(),
                        }))
                    }
                }
            }
        }

        Ok(MemberConfig {
            id,
            host,
            priority,
            votes,
            arbiter_only,
            hidden,
            slave_delay,
            tags,
        })
    }

    fn to_document(&self) -> Document {
        let mut doc = Document::new()
            .with("_id", self.id)
            .with("host", self.host.to_string())
            .with("priority", self.priority)
            .with("votes", self.votes)
            .with("arbiterOnly", self.arbiter_only)
            .with("hidden", self.hidden)
            .with("slaveDelay", self.slave_delay.as_secs() as i64);
        if !self.tags.is_empty() {
            let mut tags = Document::new();
            for (k, v) in &self.tags {
                tags.insert(k.as_str(), v.as_str());
            }
            doc.insert("tags", tags);
        }

        doc
    }
}

/// A custom write mode: for each tag key, the number of distinct tag values that must have
/// acknowledged a write.
pub type TagPattern = BTreeMap<String, usize>;

/// ReplicaSetConfig is the membership of the set plus its settings. It is immutable once
/// validated; a reconfig produces a whole new value with a higher version.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaSetConfig {
    set_name: String,
    version: i64,
    protocol_version: i64,
    members: Vec<MemberConfig>,
    election_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    last_error_modes: HashMap<String, TagPattern>,
    write_concern_majority_journal_default: bool,
}

impl ReplicaSetConfig {
    pub fn parse(doc: &Document) -> Result<Self, ConfigError> {
        let set_name = doc.require_str("_id")?.to_string();
        let version = doc.require_i64("version")?;
        let protocol_version = doc.get_i64("protocolVersion").unwrap_or(1);

        let mut members = Vec::new();
        for value in doc.require_array("members")? {
            match value.as_document() {
                Some(member) => members.push(MemberConfig::parse(member)?),
                None => {
                    return Err(ConfigError::Field(FieldError::TypeMismatch {
                        field: "members".into(),
                        expected: "object",
                        found: value.type_name(),
                    }))
                }
            }
        }

        let mut election_timeout = None;
        let mut heartbeat_interval = None;
        let mut last_error_modes = HashMap::new();
        if let Some(settings) = doc.get_document("settings") {
            if let Some(ms) = settings.get_i64("electionTimeoutMillis") {
                election_timeout = Some(Duration::from_millis(ms.max(0) as u64));
            }
            if let Some(ms) = settings.get_i64("heartbeatIntervalMillis") {
                heartbeat_interval = Some(Duration::from_millis(ms.max(0) as u64));
            }
            if let Some(modes) = settings.get_document("getLastErrorModes") {
                for (mode, pattern) in modes.iter() {
                    let pattern = pattern.as_document().ok_or_else(|| {
                        ConfigError::Invalid(format!("getLastErrorModes.{} must be an object", mode))
                    })?;
                    let mut constraints = TagPattern::new();
                    for (tag, count) in pattern.iter() {
                        let count = count.as_i64().filter(|c| *c > 0).ok_or_else(|| {
                            ConfigError::Invalid(format!("getLastErrorModes.{}.{} must be positive", mode, tag))
                        })?;
                        constraints.insert(tag.to_string(), count as usize);
                    }
                    last_error_modes.insert(mode.to_string(), constraints);
                }
            }
        }
        let write_concern_majority_journal_default = doc.get_bool("writeConcernMajorityJournalDefault").unwrap_or(true);

        let config = ReplicaSetConfig {
            set_name,
            version,
            protocol_version,
            members,
            election_timeout,
            heartbeat_interval,
            last_error_modes,
            write_concern_majority_journal_default,
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.set_name.is_empty() {
            return Err(ConfigError::Invalid("replica set name must not be empty".into()));
        }
        if self.version < 1 {
            return Err(ConfigError::Invalid("version must be at least 1".into()));
        }
        if self.protocol_version != 0 && self.protocol_version != 1 {
            return Err(ConfigError::Invalid(format!(
                "protocolVersion must be 0 or 1, not {}",
                self.protocol_version
            )));
        }
        if self.members.is_empty() {
            return Err(ConfigError::Invalid("config must have at least one member".into()));
        }

        let mut ids = HashSet::new();
        let mut hosts = HashSet::new();
        for member in &self.members {
            if !ids.insert(member.id) {
                return Err(ConfigError::Invalid(format!("duplicate member _id {}", member.id)));
            }
            if !hosts.insert(member.host.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate member host {}", member.host)));
            }
            if member.votes != 0 && member.votes != 1 {
                return Err(ConfigError::Invalid(format!("member {} votes must be 0 or 1", member.id)));
            }
            if member.priority < 0.0 {
                return Err(ConfigError::Invalid(format!("member {} priority must be >= 0", member.id)));
            }
            if member.arbiter_only && member.priority > 0.0 {
                return Err(ConfigError::Invalid(format!("arbiter {} must have priority 0", member.id)));
            }
            if (member.hidden || member.slave_delay > Duration::from_secs(0)) && member.priority > 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "hidden or delayed member {} must have priority 0",
                    member.id
                )));
            }
        }
        if !self.members.iter().any(MemberConfig::is_voter) {
            return Err(ConfigError::Invalid("config must have at least one voting member".into()));
        }
        if self.heartbeat_interval() >= self.election_timeout() {
            return Err(ConfigError::Invalid(
                "heartbeatIntervalMillis must be shorter than electionTimeoutMillis".into(),
            ));
        }
        for (mode, pattern) in &self.last_error_modes {
            for (tag, count) in pattern {
                let values: HashSet<&String> = self.members.iter().filter_map(|m| m.tags.get(tag)).collect();
                if values.len() < *count {
                    return Err(ConfigError::Invalid(format!(
                        "mode {} requires {} values of tag {} but only {} exist",
                        mode,
                        count,
                        tag,
                        values.len()
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn to_document(&self) -> Document {
        let members = self.members.iter().map(|m| Value::Document(m.to_document())).collect::<Vec<_>>();
        let mut modes = Document::new();
        let mut mode_names: Vec<_> = self.last_error_modes.keys().collect();
        mode_names.sort();
        for mode in mode_names {
            let mut pattern = Document::new();
            for (tag, count) in &self.last_error_modes[mode] {
                pattern.insert(tag.as_str(), *count as i64);
            }
            modes.insert(mode.as_str(), pattern);
        }
        let mut settings = Document::new().with("getLastErrorModes", modes);
        if let Some(timeout) = self.election_timeout {
            settings.insert("electionTimeoutMillis", timeout.as_millis() as i64);
        }
        if let Some(interval) = self.heartbeat_interval {
            settings.insert("heartbeatIntervalMillis", interval.as_millis() as i64);
        }

        Document::new()
            .with("_id", self.set_name.as_str())
            .with("version", self.version)
            .with("protocolVersion", self.protocol_version)
            .with("members", members)
            .with("settings", settings)
            .with(
                "writeConcernMajorityJournalDefault",
                self.write_concern_majority_journal_default,
            )
    }

    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn protocol_version(&self) -> i64 {
        self.protocol_version
    }

    pub fn members(&self) -> &[MemberConfig] {
        &self.members
    }

    pub fn election_timeout(&self) -> Duration {
        self.election_timeout.unwrap_or(DEFAULT_ELECTION_TIMEOUT)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL)
    }

    /// The election timeout the config sets explicitly, if any. Node options fill the gap.
    pub fn election_timeout_setting(&self) -> Option<Duration> {
        self.election_timeout
    }

    pub fn heartbeat_interval_setting(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub fn write_concern_majority_journal_default(&self) -> bool {
        self.write_concern_majority_journal_default
    }

    pub fn member_by_id(&self, id: i64) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn member_by_host(&self, host: &HostAndPort) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.host == *host)
    }

    pub fn voters(&self) -> impl Iterator<Item = &MemberConfig> {
        self.members.iter().filter(|m| m.is_voter())
    }

    /// Votes needed to win an election.
    pub fn majority_vote_count(&self) -> usize {
        self.voters().count() / 2 + 1
    }

    /// Acknowledgements needed from voting, data-bearing members for a majority write. Bounded
    /// by the number of such members so a set with many arbiters can still commit.
    pub fn write_majority(&self) -> usize {
        let data_bearing_voters = self.voters().filter(|m| m.is_data_bearing()).count();
        self.majority_vote_count().min(data_bearing_voters)
    }

    pub fn custom_write_mode(&self, mode: &str) -> Option<&TagPattern> {
        self.last_error_modes.get(mode)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn member(id: i64, host: &str) -> Document {
        Document::new().with("_id", id).with("host", host)
    }

    pub(crate) fn config_doc(members: Vec<Document>) -> Document {
        Document::new()
            .with("_id", "s")
            .with("version", 1)
            .with("protocolVersion", 1)
            .with("members", members.into_iter().map(Value::Document).collect::<Vec<_>>())
    }

    #[test]
    fn parses_defaults() {
        let config = ReplicaSetConfig::parse(&config_doc(vec![member(0, "a:1")])).unwrap();

        assert_eq!(config.set_name(), "s");
        assert_eq!(config.version(), 1);
        assert_eq!(config.election_timeout(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(2));
        assert!(config.write_concern_majority_journal_default());
        let m = &config.members()[0];
        assert_eq!(m.priority, 1.0);
        assert_eq!(m.votes, 1);
        assert!(m.is_electable());
    }

    #[test]
    fn document_form_reads_back() {
        let doc = config_doc(vec![
            member(0, "a:1").with("tags", Document::new().with("dc", "east")),
            member(1, "b:1").with("tags", Document::new().with("dc", "west")),
            member(2, "c:1").with("arbiterOnly", true),
        ])
        .with(
            "settings",
            Document::new().with(
                "getLastErrorModes",
                Document::new().with("multiDC", Document::new().with("dc", 2)),
            ),
        );
        let config = ReplicaSetConfig::parse(&doc).unwrap();

        assert_eq!(ReplicaSetConfig::parse(&config.to_document()).unwrap(), config);
        assert_eq!(config.custom_write_mode("multiDC").unwrap()["dc"], 2);
    }

    #[test]
    fn majorities() {
        let config = ReplicaSetConfig::parse(&config_doc(vec![
            member(0, "a:1"),
            member(1, "b:1"),
            member(2, "c:1").with("arbiterOnly", true),
            member(3, "d:1").with("arbiterOnly", true),
            member(4, "e:1").with("votes", 0).with("priority", 0),
        ]))
        .unwrap();

        assert_eq!(config.majority_vote_count(), 3);
        // Only two voting members hold data.
        assert_eq!(config.write_majority(), 2);
    }

    #[test]
    fn rejects_invalid_configs() {
        let cases = vec![
            ("duplicate id", config_doc(vec![member(0, "a:1"), member(0, "b:1")])),
            ("duplicate host", config_doc(vec![member(0, "a:1"), member(1, "a:1")])),
            ("no voters", config_doc(vec![member(0, "a:1").with("votes", 0).with("priority", 0)])),
            ("votes 2", config_doc(vec![member(0, "a:1").with("votes", 2)])),
            (
                "arbiter priority",
                config_doc(vec![member(0, "a:1"), member(1, "b:1").with("arbiterOnly", true).with("priority", 1)]),
            ),
            ("hidden priority", config_doc(vec![member(0, "a:1"), member(1, "b:1").with("hidden", true)])),
            ("no members", config_doc(vec![])),
        ];

        for (name, doc) in cases {
            match ReplicaSetConfig::parse(&doc) {
                Err(ConfigError::Invalid(_)) => {}
                other => panic!("{}: expected Invalid, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn rejects_malformed_host() {
        let result = ReplicaSetConfig::parse(&config_doc(vec![member(0, "nohost")]));

        assert!(matches!(result, Err(ConfigError::Host(_))));
    }
}
