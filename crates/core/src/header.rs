//! FITS header model and header-derived image metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Value of a single header keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl HeaderValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Int(v) => Some(*v as f64),
            HeaderValue::Float(v) => Some(*v),
            HeaderValue::Text(s) => s.trim().parse().ok(),
            HeaderValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// A keyword/value pair with an optional comment, as written back to a header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderCard {
    pub keyword: String,
    pub value: HeaderValue,
    pub comment: Option<String>,
}

impl HeaderCard {
    pub fn new(keyword: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        Self {
            keyword: keyword.into(),
            value: value.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Primary header of a data file. Keywords are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FitsHeader {
    cards: BTreeMap<String, HeaderValue>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, keyword: &str, value: impl Into<HeaderValue>) -> Self {
        self.insert(keyword, value);
        self
    }

    pub fn insert(&mut self, keyword: &str, value: impl Into<HeaderValue>) {
        self.cards.insert(keyword.to_ascii_uppercase(), value.into());
    }

    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.cards.get(&keyword.to_ascii_uppercase())
    }

    pub fn get_f64(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(HeaderValue::as_f64)
    }

    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(HeaderValue::as_str)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.cards.contains_key(&keyword.to_ascii_uppercase())
    }

    pub fn apply(&mut self, cards: &[HeaderCard]) {
        for card in cards {
            self.insert(&card.keyword, card.value.clone());
        }
    }

    /// Detector gain in e-/ADU (`GAIN` or `EGAIN`); 1 when absent.
    pub fn gain(&self) -> f64 {
        self.get_f64("GAIN")
            .or_else(|| self.get_f64("EGAIN"))
            .filter(|g| *g > 0.0)
            .unwrap_or(1.0)
    }

    /// Exposure length in seconds (`EXPTIME` or `EXPOSURE`).
    pub fn exposure_time(&self) -> Option<f64> {
        self.get_f64("EXPTIME").or_else(|| self.get_f64("EXPOSURE"))
    }

    /// Exposure start time.
    ///
    /// `DATE-OBS` may carry the full timestamp; otherwise the time of day is
    /// taken from `TIME-OBS` or `UT`.
    pub fn observation_time(&self) -> Option<DateTime<Utc>> {
        let date_obs = self.get_str("DATE-OBS")?.trim();
        if let Some(ts) = parse_timestamp(date_obs) {
            return Some(ts);
        }
        let date = NaiveDate::parse_from_str(date_obs, "%Y-%m-%d").ok()?;
        let time = self
            .get_str("TIME-OBS")
            .or_else(|| self.get_str("UT"))
            .and_then(|t| NaiveTime::parse_from_str(t.trim(), "%H:%M:%S%.f").ok())
            .unwrap_or(NaiveTime::MIN);
        Some(date.and_time(time).and_utc())
    }

    pub fn filter(&self) -> Option<&str> {
        self.get_str("FILTER").map(str::trim)
    }

    pub fn telescope(&self) -> Option<&str> {
        self.get_str("TELESCOP").map(str::trim)
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ts| ts.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn gain_falls_back_to_egain_then_unity() {
        assert_eq!(FitsHeader::new().with("EGAIN", 1.5).gain(), 1.5);
        assert_eq!(FitsHeader::new().with("gain", 2.0).gain(), 2.0);
        assert_eq!(FitsHeader::new().gain(), 1.0);
        assert_eq!(FitsHeader::new().with("GAIN", 0.0).gain(), 1.0);
    }

    #[test]
    fn observation_time_from_full_date_obs() {
        let hdr = FitsHeader::new().with("DATE-OBS", "2021-03-04T05:06:07.5");
        let expected = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(hdr.observation_time(), Some(expected));
    }

    #[test]
    fn observation_time_combines_date_and_time_obs() {
        let hdr = FitsHeader::new()
            .with("DATE-OBS", "2021-03-04")
            .with("TIME-OBS", "22:00:01");
        assert_eq!(
            hdr.observation_time(),
            Some(Utc.with_ymd_and_hms(2021, 3, 4, 22, 0, 1).unwrap())
        );
    }

    #[test]
    fn numeric_text_values_are_parsed() {
        let hdr = FitsHeader::new().with("EXPTIME", " 30.0 ").with("FILTER", "V ");
        assert_eq!(hdr.exposure_time(), Some(30.0));
        assert_eq!(hdr.filter(), Some("V"));
        assert_eq!(hdr.get_str("filter"), Some("V "));
    }

    #[test]
    fn applying_cards_overwrites_keywords() {
        let mut hdr = FitsHeader::new().with("PHOT_M0", 1.0);
        hdr.apply(&[HeaderCard::new("phot_m0", 21.5).with_comment("Photometric zero point")]);
        assert_eq!(hdr.get_f64("PHOT_M0"), Some(21.5));
    }
}
