use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::container::Container;
use crate::fsutil;

use super::{Classification, Classifier};

/// Technology name in a label rule that means "use the label's value".
const AUTO_TECH: &str = "auto";

const DEFAULT_THRESHOLD: u32 = 50;
const MAX_POINTS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub tech: String,
    pub weight: u32,
}

/// Weighted signatures keyed by what they match against.
///
/// - `ports`: exposed or published port numbers, e.g., `"5432"`.
/// - `env`: substrings of `KEY=value` environment entries.
/// - `images`: substrings of the lowercase image reference.
/// - `labels`: label keys; a rule whose tech is `auto` credits the label's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default)]
    pub ports: BTreeMap<String, Rule>,
    #[serde(default)]
    pub env: BTreeMap<String, Rule>,
    #[serde(default)]
    pub images: BTreeMap<String, Rule>,
    #[serde(default)]
    pub labels: BTreeMap<String, Rule>,
}

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn rules(entries: &[(&str, &str, u32)]) -> BTreeMap<String, Rule> {
    entries
        .iter()
        .map(|(key, tech, weight)| {
            (
                (*key).to_owned(),
                Rule {
                    tech: (*tech).to_owned(),
                    weight: *weight,
                },
            )
        })
        .collect()
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            images: rules(&[
                ("postgres", "postgresql", 60),
                ("timescaledb", "timescaledb", 60),
                ("mysql", "mysql", 60),
                ("mariadb", "mariadb", 60),
                ("mongo", "mongodb", 60),
                ("redis", "redis", 60),
                ("nginx", "nginx", 60),
                ("rabbitmq", "rabbitmq", 60),
                ("elasticsearch", "elasticsearch", 60),
                ("opensearch", "opensearch", 60),
                ("clickhouse", "clickhouse", 60),
                ("influxdb", "influxdb", 60),
                ("cassandra", "cassandra", 60),
                ("kafka", "kafka", 60),
                ("nats", "nats", 60),
                ("neo4j", "neo4j", 60),
                ("couchdb", "couchdb", 60),
            ]),
            ports: rules(&[
                ("5432", "postgresql", 30),
                ("3306", "mysql", 30),
                ("27017", "mongodb", 30),
                ("6379", "redis", 30),
                ("80", "nginx", 20),
                ("5672", "rabbitmq", 30),
                ("15672", "rabbitmq", 20),
                ("9200", "elasticsearch", 30),
                ("8123", "clickhouse", 30),
                ("8086", "influxdb", 30),
                ("9042", "cassandra", 30),
                ("9092", "kafka", 30),
                ("4222", "nats", 30),
                ("7474", "neo4j", 30),
                ("5984", "couchdb", 30),
            ]),
            env: rules(&[
                ("POSTGRES_", "postgresql", 30),
                ("PGDATA", "postgresql", 20),
                ("MYSQL_", "mysql", 30),
                ("MARIADB_", "mariadb", 30),
                ("MONGO_INITDB_", "mongodb", 30),
                ("REDIS_", "redis", 20),
                ("NGINX_VERSION", "nginx", 30),
                ("RABBITMQ_", "rabbitmq", 30),
                ("ELASTIC_", "elasticsearch", 30),
                ("OPENSEARCH_", "opensearch", 30),
                ("CLICKHOUSE_", "clickhouse", 30),
                ("INFLUXDB_", "influxdb", 30),
                ("KAFKA_", "kafka", 30),
            ]),
            labels: rules(&[("stackscout.stack", AUTO_TECH, 100)]),
        }
    }
}

/// Sums the weights of every matching rule per technology and keeps technologies whose
/// points reach the threshold. Score is `min(points, 100) / 100`.
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier {
    rules: RuleSet,
}

impl RuleClassifier {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Loads a JSON [`RuleSet`] replacing the built-in rules.
    ///
    /// # Errors
    ///
    /// Returns an [`fsutil::Error`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> fsutil::Result<Self> {
        let rules: RuleSet = fsutil::read_json(path.as_ref())?;
        log::info!(
            "Loaded classifier rules from {} ({} port, {} env, {} image, {} label rules)",
            path.as_ref().display(),
            rules.ports.len(),
            rules.env.len(),
            rules.images.len(),
            rules.labels.len()
        );
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

fn credit(points: &mut BTreeMap<String, u32>, tech: &str, weight: u32) {
    *points.entry(tech.to_owned()).or_default() += weight;
}

impl Classifier for RuleClassifier {
    fn classify(&self, container: &Container) -> Classification {
        let Some(image) = container.image() else {
            log::debug!("Container `{}` has no image reference", container.id);
            return Classification::unknown();
        };
        let image = image.to_lowercase();
        let ports: BTreeSet<&str> = container
            .exposed_ports()
            .into_iter()
            .chain(container.published_ports())
            .collect();

        let mut points: BTreeMap<String, u32> = BTreeMap::new();
        for (port, rule) in &self.rules.ports {
            if ports.contains(port.as_str()) {
                credit(&mut points, &rule.tech, rule.weight);
            }
        }
        for (key, rule) in &self.rules.env {
            if container.config.env.iter().any(|entry| entry.contains(key.as_str())) {
                credit(&mut points, &rule.tech, rule.weight);
            }
        }
        for (part, rule) in &self.rules.images {
            if image.contains(part.as_str()) {
                credit(&mut points, &rule.tech, rule.weight);
            }
        }
        for (key, rule) in &self.rules.labels {
            let Some(value) = container.label(key) else {
                continue;
            };
            if rule.tech == AUTO_TECH {
                credit(&mut points, value, rule.weight);
            } else {
                credit(&mut points, &rule.tech, rule.weight);
            }
        }

        Classification::new(
            points
                .into_iter()
                .filter(|(_, points)| *points >= self.rules.threshold)
                .map(|(tech, points)| {
                    (tech, f64::from(points.min(MAX_POINTS)) / f64::from(MAX_POINTS))
                }),
        )
    }
}
