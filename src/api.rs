pub mod client;
pub mod error;
pub mod experiment;
pub mod id;
pub mod log;
pub mod metric;

// deserialize Option<milliseconds since the epoch> as Option<DateTime<Utc>>
pub(crate) mod opt_ms_timestamp {
    use chrono::{DateTime, TimeZone, Utc};

    use serde::de::{self, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<i64>::deserialize(deserializer)?;
        if let Some(millis) = millis {
            let date = Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| de::Error::custom(format!("timestamp {} is out of range", millis)))?;
            Ok(Some(date))
        } else {
            Ok(None)
        }
    }
}

// deserialize Option<"YYYY-MM-DD"> as Option<DateTime<Utc>>, midnight UTC
pub(crate) mod opt_iso_date {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use serde::de::{self, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        if let Some(s) = s {
            let date = NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(de::Error::custom)?;
            Ok(Some(Utc.from_utc_datetime(&date.and_hms(0, 0, 0))))
        } else {
            Ok(None)
        }
    }
}

// log timestamps: read leniently, always written as ISO-8601
pub(crate) mod log_timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

    use serde::de::{self, Deserialize, Deserializer};
    use serde::ser::Serializer;

    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(f64),
    }

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        if let Ok(date) = DateTime::parse_from_rfc3339(s) {
            return Some(date.with_timezone(&Utc));
        }
        let naive = s.trim_end_matches(" UTC");
        for format in &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(date) = NaiveDateTime::parse_from_str(naive, format) {
                return Some(Utc.from_utc_datetime(&date));
            }
        }
        if let Ok(date) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
            return Some(date.with_timezone(&Utc));
        }
        // BigQuery REST encodes TIMESTAMP cells as epoch seconds, e.g. "1.658813847E9"
        s.parse::<f64>().ok().and_then(from_seconds)
    }

    fn from_seconds(seconds: f64) -> Option<DateTime<Utc>> {
        let millis = (seconds * 1000.0).round() as i64;
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => {
                parse(&s).ok_or_else(|| de::Error::custom(format!("invalid timestamp {:?}", s)))
            }
            Raw::Seconds(seconds) => from_seconds(seconds)
                .ok_or_else(|| de::Error::custom(format!("timestamp {} is out of range", seconds))),
        }
    }

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    #[cfg(test)]
    mod tests {
        use super::parse;
        use chrono::{TimeZone, Utc};

        #[test]
        fn parses_every_sink_format() {
            let expected = Utc.ymd(2022, 7, 26).and_hms(4, 41, 49);
            assert_eq!(parse("2022-07-26 04:41:49"), Some(expected));
            assert_eq!(parse("2022-07-26 04:41:49 UTC"), Some(expected));
            assert_eq!(parse("2022-07-26T04:41:49Z"), Some(expected));
            assert_eq!(parse("2022-07-26 04:41:49+00:00"), Some(expected));
            assert_eq!(parse("1.658810509E9"), Some(expected));
            assert_eq!(parse("yesterday"), None);
        }
    }
}
