use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

/// Accepted layouts, tried in order, each with the shape the text must have.
/// chrono's `%Y` takes any digit count, so the shape pins the year to four
/// digits. A string valid under more than one layout (e.g. "03/04/2020")
/// takes the first: month-first wins over day-first for slashed dates.
const DATE_FORMATS: [(&str, &str); 4] = [
    ("%Y-%m-%d", r"^\d{4}-\d{1,2}-\d{1,2}$"),
    ("%m/%d/%Y", r"^\d{1,2}/\d{1,2}/\d{4}$"),
    ("%d-%m-%Y", r"^\d{1,2}-\d{1,2}-\d{4}$"),
    ("%d/%m/%Y", r"^\d{1,2}/\d{1,2}/\d{4}$"),
];

fn layouts() -> &'static [(&'static str, Regex)] {
    static LAYOUTS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    LAYOUTS.get_or_init(|| {
        DATE_FORMATS
            .iter()
            .map(|(fmt, shape)| (*fmt, Regex::new(shape).unwrap()))
            .collect()
    })
}

/// Parse a free-form date into a calendar date.
///
/// Returns `None` for absent input and for anything no layout accepts;
/// an unparseable date is never an error.
pub fn normalize(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    layouts()
        .iter()
        .filter(|(_, shape)| shape.is_match(raw))
        .find_map(|(fmt, _)| NaiveDate::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn each_layout() {
        assert_eq!(normalize(Some("2023-10-15")), ymd(2023, 10, 15));
        assert_eq!(normalize(Some("10/15/2023")), ymd(2023, 10, 15));
        assert_eq!(normalize(Some("15-10-2023")), ymd(2023, 10, 15));
        assert_eq!(normalize(Some("15/10/2023")), ymd(2023, 10, 15));
    }

    #[test]
    fn absent_and_unparseable() {
        assert_eq!(normalize(None), None);
        assert_eq!(normalize(Some("")), None);
        assert_eq!(normalize(Some("October 15th")), None);
        assert_eq!(normalize(Some("2023-02-30")), None);
        assert_eq!(normalize(Some("15.10.2023")), None);
    }

    #[test]
    fn two_digit_years_rejected() {
        assert_eq!(normalize(Some("10/15/23")), None);
        assert_eq!(normalize(Some("05-06-07")), None);
        assert_eq!(normalize(Some("15/10/23")), None);
        assert_eq!(normalize(Some("23-10-15")), None);
        assert_eq!(normalize(Some("923-10-15")), None);
        assert_eq!(normalize(Some("+2023-10-15")), None);
    }

    #[test]
    fn single_digit_month_and_day() {
        assert_eq!(normalize(Some("2023-1-5")), ymd(2023, 1, 5));
        assert_eq!(normalize(Some("1/5/2023")), ymd(2023, 1, 5));
    }

    #[test]
    fn surrounding_whitespace_ignored() {
        assert_eq!(normalize(Some("  2023-10-15\n")), ymd(2023, 10, 15));
    }

    // Known ambiguity: month-first is tried before day-first.
    #[test]
    fn ambiguous_slash_date_is_month_first() {
        assert_eq!(normalize(Some("03/04/2020")), ymd(2020, 3, 4));
    }

    #[test]
    fn day_first_slash_when_month_out_of_range() {
        assert_eq!(normalize(Some("13/04/2020")), ymd(2020, 4, 13));
    }
}
