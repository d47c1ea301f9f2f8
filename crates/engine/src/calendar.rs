use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use tracing::{info, warn};

use common::{Config, Error, Result, TradingCalendar};

/// Exchange calendar: a daily session window in exchange-local time, closed
/// on weekends and on listed holidays.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    open: NaiveTime,
    close: NaiveTime,
    offset: FixedOffset,
    holidays: HashSet<NaiveDate>,
}

impl MarketCalendar {
    pub fn new(open: NaiveTime, close: NaiveTime, offset: FixedOffset) -> Self {
        Self {
            open,
            close,
            offset,
            holidays: HashSet::new(),
        }
    }

    pub fn with_holidays(mut self, holidays: HashSet<NaiveDate>) -> Self {
        self.holidays = holidays;
        self
    }

    /// Build from configuration, loading the holiday file.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let offset = FixedOffset::east_opt(cfg.market_utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "MARKET_UTC_OFFSET_MINUTES out of range: {}",
                cfg.market_utc_offset_minutes
            ))
        })?;
        let holidays = load_holidays(&cfg.holidays_path)?;
        Ok(Self::new(cfg.market_open, cfg.market_close, offset).with_holidays(holidays))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl TradingCalendar for MarketCalendar {
    fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.offset);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if self.holidays.contains(&local.date_naive()) {
            return false;
        }
        let time = local.time();
        time >= self.open && time <= self.close
    }

    fn session_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }
}

/// Read a JSON array of `YYYY-MM-DD` strings.
///
/// A missing file yields an empty set with a warning; individual entries that
/// do not parse are skipped.
pub fn load_holidays(path: impl AsRef<Path>) -> Result<HashSet<NaiveDate>> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "Holiday file not found, holiday closures will not apply");
        return Ok(HashSet::new());
    }
    let content = std::fs::read_to_string(path)?;
    let holidays = parse_holidays(&content)?;
    info!(count = holidays.len(), path = %path.display(), "Loaded holidays");
    Ok(holidays)
}

fn parse_holidays(content: &str) -> Result<HashSet<NaiveDate>> {
    let entries: Vec<String> = serde_json::from_str(content)?;
    Ok(entries
        .iter()
        .filter_map(|s| match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => {
                warn!(entry = %s, "Skipping unparsable holiday entry");
                None
            }
        })
        .collect())
}
