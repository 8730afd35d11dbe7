//! Query-string time windows for downlink requests.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use url::Url;

use thingrelay_core::timefmt::TimeFormat;

use crate::error::{DownlinkError, Result};
use crate::model::TimeFilter;

/// Rewrite `raw_url` so the filter's start/end parameters hold the window
/// `now - window .. now`, or `now .. now + window` for forecasts. Other query
/// parameters keep their order.
pub fn apply_time_filter(raw_url: &str, filter: &TimeFilter, tz: Tz, now: DateTime<Utc>) -> Result<String> {
    let mut url = Url::parse(raw_url).map_err(|e| DownlinkError::Invalid(e.to_string()))?;
    let window = chrono::Duration::from_std(filter.window())
        .map_err(|e| DownlinkError::Invalid(e.to_string()))?;

    let (start, end) = if filter.forecast {
        (now, now + window)
    } else {
        (now - window, now)
    };

    let format = TimeFormat::parse(&filter.format);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != filter.start_param.as_str() && k != filter.end_param.as_str())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        if !filter.start_param.is_empty() {
            query.append_pair(&filter.start_param, &format.format(start, tz));
        }
        if !filter.end_param.is_empty() {
            query.append_pair(&filter.end_param, &format.format(end, tz));
        }
    }

    Ok(url.to_string())
}

/// `scheme://host[:port]/path` with query and fragment stripped; the
/// rate-limiter key for a request.
pub fn base_url(raw_url: &str) -> Result<String> {
    let mut url = Url::parse(raw_url).map_err(|e| DownlinkError::Invalid(e.to_string()))?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}
