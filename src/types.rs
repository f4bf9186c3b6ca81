use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// How the archiver samples a PV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SamplingMethod {
    #[default]
    Monitor,
    Scan,
}

impl SamplingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMethod::Monitor => "MONITOR",
            SamplingMethod::Scan => "SCAN",
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MONITOR" => Ok(SamplingMethod::Monitor),
            "SCAN" => Ok(SamplingMethod::Scan),
            other => Err(format!("unknown sampling method {}; expected MONITOR or SCAN", other)),
        }
    }
}

/// One archive request as submitted to `archivePV`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvConfig {
    pub pv: String,
    #[serde(
        rename = "samplingperiod",
        serialize_with = "serialize_period",
        deserialize_with = "deserialize_string_or_float"
    )]
    pub sampling_period: f64,
    #[serde(rename = "samplingmethod")]
    pub sampling_method: SamplingMethod,
}

impl PvConfig {
    pub fn new(pv: impl Into<String>, sampling_period: f64, sampling_method: SamplingMethod) -> Self {
        Self {
            pv: pv.into(),
            sampling_period,
            sampling_method,
        }
    }
}

/// Row of `getCurrentlyDisconnectedPVs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectedPv {
    #[serde(rename = "pvName")]
    pub name: String,
    #[serde(
        rename = "noConnectionAsOfEpochSecs",
        deserialize_with = "deserialize_string_or_float"
    )]
    pub last_seen_epoch_secs: f64,
}

/// Row of `getPausedPVsReport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PausedPv {
    #[serde(rename = "pvName")]
    pub name: String,
}

/// One row of a pause/resume/submit response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AckEntry {
    #[serde(rename = "pvName", default, alias = "pv")]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Registry acknowledgement; the archiver answers with either a single
/// object or an array of them.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Ack {
    pub entries: Vec<AckEntry>,
}

impl Ack {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'de> Deserialize<'de> for Ack {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            Many(Vec<AckEntry>),
            One(AckEntry),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::Many(entries) => Ack { entries },
            OneOrMany::One(entry) => Ack {
                entries: vec![entry],
            },
        })
    }
}

fn serialize_period<S>(period: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&period.to_string())
}

// The archiver reports numbers as strings in most of its JSON.

fn deserialize_string_or_float<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: serde_json::Value = Deserialize::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => s.trim().parse::<f64>().map_err(D::Error::custom),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom("Invalid number")),
        other => Err(D::Error::custom(format!("expected number, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_pv_config_wire_format() {
        let config = PvConfig::new("XCOR:LI21:101:BDES", 2.0, SamplingMethod::Scan);
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({"pv": "XCOR:LI21:101:BDES", "samplingperiod": "2", "samplingmethod": "SCAN"})
        );

        let fractional = PvConfig::new("A", 0.5, SamplingMethod::Monitor);
        assert_eq!(serde_json::to_value(&fractional).unwrap()["samplingperiod"], "0.5");
    }

    #[test]
    fn test_disconnected_row_accepts_string_or_number() {
        let rows: Vec<DisconnectedPv> = serde_json::from_value(json!([
            {"pvName": "A", "noConnectionAsOfEpochSecs": "1700000000", "instance": "appliance0"},
            {"pvName": "B", "noConnectionAsOfEpochSecs": 1700000100.5}
        ]))
        .unwrap();
        assert_eq!(rows[0].last_seen_epoch_secs, 1_700_000_000.0);
        assert_eq!(rows[1].last_seen_epoch_secs, 1_700_000_100.5);
    }

    #[test]
    fn test_ack_single_or_many() {
        let many: Ack = serde_json::from_value(json!([
            {"pvName": "A", "status": "ok"},
            {"pvName": "B", "status": "Archive request submitted", "validation": "none"}
        ]))
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many.entries[1].extra["validation"], "none");

        let one: Ack = serde_json::from_value(json!({"status": "ok"})).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one.entries[0].name, None);
    }

    #[test]
    fn test_sampling_method_parsing() {
        assert_eq!("scan".parse::<SamplingMethod>(), Ok(SamplingMethod::Scan));
        assert_eq!("Monitor".parse::<SamplingMethod>(), Ok(SamplingMethod::Monitor));
        assert!("poll".parse::<SamplingMethod>().is_err());
    }
}
