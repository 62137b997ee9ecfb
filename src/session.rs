use std::sync::OnceLock;

use anyhow::{bail, Result};
use regex::Regex;
use urlencoding::encode;

use crate::timestamps::{FilterRange, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn sigil(self) -> char {
        match self {
            SortDirection::Ascending => '+',
            SortDirection::Descending => '-',
        }
    }

    fn from_sigil(sigil: char) -> Option<Self> {
        match sigil {
            '+' => Some(SortDirection::Ascending),
            '-' => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

/// Ordered multi-column sort preference. At most one entry per column; the
/// most recently toggled column sits first and is the primary sort key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    entries: Vec<(usize, SortDirection)>,
}

fn sort_grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]\d+(,[+-]\d+)*$").expect("sort grammar regex"))
}

impl SortSpec {
    /// Record a sort click. Any previous entry for `column` is removed, then
    /// `(column, direction)` is prepended: clicking the opposite arrow of the
    /// current primary column flips it in place, clicking a different column
    /// demotes the previous primary key to secondary without discarding it.
    pub fn toggle(&mut self, direction: SortDirection, column: usize) {
        self.entries.retain(|(col, _)| *col != column);
        self.entries.insert(0, (column, direction));
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[(usize, SortDirection)] {
        &self.entries
    }

    /// Encode as the `sort` query parameter: `{+|-}{column}` joined by `,`,
    /// primary key first. The empty spec encodes to the empty string.
    pub fn encode(&self) -> String {
        let opts: Vec<String> = self
            .entries
            .iter()
            .map(|(column, direction)| format!("{}{}", direction.sigil(), column))
            .collect();
        opts.join(",")
    }

    /// Exact inverse of [`SortSpec::encode`]. Rejects anything outside the
    /// `(("+"|"-")digits)(","("+"|"-")digits)*` grammar and duplicate
    /// column references.
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.is_empty() {
            return Ok(Self::default());
        }
        if !sort_grammar().is_match(spec) {
            bail!("invalid sort spec '{spec}': expected entries like +2 or -0, joined by ','");
        }

        let mut parsed = Self::default();
        for opt in spec.split(',') {
            let mut chars = opt.chars();
            let Some(direction) = chars.next().and_then(SortDirection::from_sigil) else {
                bail!("invalid sort spec '{spec}': entry '{opt}' has no +/- sigil");
            };
            let column: usize = chars.as_str().parse()?;

            if parsed.entries.iter().any(|(col, _)| *col == column) {
                bail!("invalid sort spec '{spec}': column {column} appears more than once");
            }
            parsed.entries.push((column, direction));
        }
        Ok(parsed)
    }

    /// Membership test used to mark a column's sort toggle as active, e.g.
    /// `is_active(Ascending, 2)` iff the encoded spec contains `+2`.
    pub fn is_active(&self, direction: SortDirection, column: usize) -> bool {
        self.entries.contains(&(column, direction))
    }
}

/// The user's requested datetime window, both bounds in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSelection {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Check a requested window against the dataset bounds. Pure: must run
/// strictly before any selection is stored. Bound checks are skipped for
/// whichever side of the range is unset (no dataset loaded yet).
pub fn validate_filter(
    start: Option<&Timestamp>,
    end: Option<&Timestamp>,
    range: &FilterRange,
) -> Result<FilterSelection> {
    let Some(start) = start else {
        bail!("the start date time field for filtering is empty");
    };
    let Some(end) = end else {
        bail!("the end date time field for filtering is empty");
    };

    if let Some(min) = &range.min {
        if start < min {
            bail!("start date time is less than the minimum value in the log file ({min})");
        }
    }
    if let Some(max) = &range.max {
        if end > max {
            bail!("end date time is more than the maximum value in the log file ({max})");
        }
    }
    if start > end {
        bail!("start date time is more than the end date time");
    }

    Ok(FilterSelection {
        start: start.clone(),
        end: end.clone(),
    })
}

/// All request-shaping state for one client session: sort preference,
/// dataset bounds, and the validated filter window. Owns every mutation;
/// nothing here touches the network.
#[derive(Debug, Clone, Default)]
pub struct ClientSession {
    sort: SortSpec,
    range: FilterRange,
    filter: Option<FilterSelection>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn toggle_sort(&mut self, direction: SortDirection, column: usize) {
        self.sort.toggle(direction, column);
    }

    #[allow(dead_code)]
    pub fn reset_sort(&mut self) {
        self.sort.reset();
    }

    /// Replay a parsed spec as a sequence of clicks, minor key first, so the
    /// result encodes back to the given spec.
    pub fn apply_sort(&mut self, spec: &SortSpec) {
        for (column, direction) in spec.entries().iter().rev() {
            self.toggle_sort(*direction, *column);
        }
    }

    /// Install the bounds of a newly selected dataset. Any filter window
    /// from the previous dataset is cleared.
    pub fn set_range(&mut self, range: FilterRange) {
        self.range = range;
        self.filter = None;
    }

    /// Validate a requested window against the current bounds and store it.
    pub fn apply_filter(&mut self, start: Option<Timestamp>, end: Option<Timestamp>) -> Result<()> {
        let selection = validate_filter(start.as_ref(), end.as_ref(), &self.range)?;
        self.set_filter(selection);
        Ok(())
    }

    /// Unconditional overwrite; callers are expected to have validated.
    pub fn set_filter(&mut self, selection: FilterSelection) {
        self.filter = Some(selection);
    }

    #[allow(dead_code)]
    pub fn reset_filter(&mut self) {
        self.filter = None;
    }

    /// The `filter` wire value, `"<start>,<end>"` with empty sides when no
    /// window is set. Shared verbatim between query parameters and the plot
    /// job payload.
    pub fn filter_param(&self) -> String {
        match &self.filter {
            Some(selection) => format!("{},{}", selection.start, selection.end),
            None => ",".to_string(),
        }
    }

    /// Request path for table data: `/get_csv/{id}` (or `/download_csv/{id}`
    /// for the attachment variant) with the session's sort and filter
    /// serialized as query parameters. Referentially transparent: identical
    /// session state yields a byte-identical path.
    pub fn table_path(&self, dataset: &str, for_download: bool) -> String {
        let endpoint = if for_download {
            "/download_csv/"
        } else {
            "/get_csv/"
        };
        format!(
            "{endpoint}{}?sort={}&filter={}",
            encode(dataset),
            self.sort.encode(),
            self.filter_param()
        )
    }

    pub fn metadata_path(dataset: &str) -> String {
        format!("/get_metadata/{}", encode(dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> Timestamp {
        Timestamp::parse(value).expect("test timestamp")
    }

    #[test]
    fn toggles_prepend_most_recent_and_keep_order() {
        let mut spec = SortSpec::default();
        spec.toggle(SortDirection::Ascending, 2);
        spec.toggle(SortDirection::Descending, 0);
        assert_eq!(spec.encode(), "-0,+2");
    }

    #[test]
    fn same_direction_toggle_is_idempotent_in_membership() {
        let mut spec = SortSpec::default();
        spec.toggle(SortDirection::Ascending, 2);
        spec.toggle(SortDirection::Ascending, 2);
        assert_eq!(spec.encode(), "+2");
        assert_eq!(spec.entries().len(), 1);
    }

    #[test]
    fn opposite_arrow_flips_in_place_and_promotes() {
        let mut spec = SortSpec::default();
        spec.toggle(SortDirection::Ascending, 2);
        spec.toggle(SortDirection::Descending, 0);
        spec.toggle(SortDirection::Descending, 2);
        assert_eq!(spec.encode(), "-2,-0");
    }

    #[test]
    fn empty_spec_encodes_to_empty_string() {
        let mut spec = SortSpec::default();
        assert_eq!(spec.encode(), "");
        spec.toggle(SortDirection::Ascending, 1);
        spec.reset();
        assert_eq!(spec.encode(), "");
    }

    #[test]
    fn parse_is_the_inverse_of_encode() {
        for spec in ["", "+2", "-0,+2", "-4,+1,-0"] {
            let parsed = SortSpec::parse(spec).expect("valid spec");
            assert_eq!(parsed.encode(), spec);
        }
    }

    #[test]
    fn parse_rejects_bad_grammar_and_duplicates() {
        assert!(SortSpec::parse("2").is_err());
        assert!(SortSpec::parse("+2,").is_err());
        assert!(SortSpec::parse("*2").is_err());
        assert!(SortSpec::parse("+2,-2").is_err());
    }

    #[test]
    fn active_membership_follows_encoding() {
        let spec = SortSpec::parse("-0,+2").expect("valid spec");
        assert!(spec.is_active(SortDirection::Ascending, 2));
        assert!(spec.is_active(SortDirection::Descending, 0));
        assert!(!spec.is_active(SortDirection::Descending, 2));
        assert!(!spec.is_active(SortDirection::Ascending, 1));
    }

    #[test]
    fn validate_accepts_inclusive_bounds() {
        let range = FilterRange::new(ts("2022-01-01 00:00:00"), ts("2022-12-31 23:59:59"));
        let selection = validate_filter(
            Some(&ts("2022-01-01 00:00:00")),
            Some(&ts("2022-12-31 23:59:59")),
            &range,
        )
        .expect("inclusive bounds accepted");
        assert_eq!(selection.start, ts("2022-01-01 00:00:00"));
    }

    #[test]
    fn validate_rejects_inverted_window_inside_bounds() {
        let range = FilterRange::new(ts("2022-01-01 00:00:00"), ts("2022-12-31 23:59:59"));
        let err = validate_filter(
            Some(&ts("2022-06-01 00:00:00")),
            Some(&ts("2022-05-01 00:00:00")),
            &range,
        )
        .expect_err("inverted window");
        assert!(err.to_string().contains("more than the end"));
    }

    #[test]
    fn validate_rejects_out_of_range_and_names_the_bound() {
        let range = FilterRange::new(ts("2022-01-01 00:00:00"), ts("2022-12-31 23:59:59"));
        let err = validate_filter(
            Some(&ts("2021-01-01 00:00:00")),
            Some(&ts("2022-05-01 00:00:00")),
            &range,
        )
        .expect_err("start below min");
        assert!(err.to_string().contains("2022-01-01 00:00:00"));

        let err = validate_filter(
            Some(&ts("2022-06-01 00:00:00")),
            Some(&ts("2023-05-01 00:00:00")),
            &range,
        )
        .expect_err("end above max");
        assert!(err.to_string().contains("2022-12-31 23:59:59"));
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let range = FilterRange::default();
        assert!(validate_filter(None, Some(&ts("2022-05-01 00:00:00")), &range).is_err());
        assert!(validate_filter(Some(&ts("2022-05-01 00:00:00")), None, &range).is_err());
    }

    #[test]
    fn validate_skips_bound_checks_when_range_unknown() {
        // No dataset loaded yet: only the ordering check applies.
        let range = FilterRange::default();
        assert!(validate_filter(
            Some(&ts("1990-01-01 00:00:00")),
            Some(&ts("2100-01-01 00:00:00")),
            &range,
        )
        .is_ok());
    }

    #[test]
    fn table_path_is_referentially_transparent() {
        let mut session = ClientSession::new();
        session.toggle_sort(SortDirection::Ascending, 2);
        session.toggle_sort(SortDirection::Descending, 0);
        session
            .apply_filter(
                Some(ts("2022-01-01 00:00:00")),
                Some(ts("2022-12-31 23:59:59")),
            )
            .expect("filter applies");

        let first = session.table_path("HDFS_2k", false);
        let second = session.table_path("HDFS_2k", false);
        assert_eq!(first, second);
        assert_eq!(
            first,
            "/get_csv/HDFS_2k?sort=-0,+2&filter=2022-01-01 00:00:00,2022-12-31 23:59:59"
        );
    }

    #[test]
    fn unset_options_serialize_as_empty_strings() {
        let session = ClientSession::new();
        assert_eq!(
            session.table_path("HDFS_2k", false),
            "/get_csv/HDFS_2k?sort=&filter=,"
        );
        assert_eq!(
            session.table_path("HDFS_2k", true),
            "/download_csv/HDFS_2k?sort=&filter=,"
        );
    }

    #[test]
    fn apply_sort_round_trips_an_encoded_spec() {
        let mut session = ClientSession::new();
        let spec = SortSpec::parse("-0,+2").expect("valid spec");
        session.apply_sort(&spec);
        assert_eq!(session.sort().encode(), "-0,+2");
    }

    #[test]
    fn new_dataset_bounds_clear_the_old_window() {
        let mut session = ClientSession::new();
        session
            .apply_filter(
                Some(ts("2022-01-01 00:00:00")),
                Some(ts("2022-12-31 23:59:59")),
            )
            .expect("filter applies");
        assert_eq!(
            session.filter_param(),
            "2022-01-01 00:00:00,2022-12-31 23:59:59"
        );

        session.set_range(FilterRange::new(
            ts("2023-01-01 00:00:00"),
            ts("2023-12-31 23:59:59"),
        ));
        assert_eq!(session.filter_param(), ",");
    }

    #[test]
    fn resets_return_to_the_initial_state() {
        let mut session = ClientSession::new();
        session.toggle_sort(SortDirection::Descending, 0);
        session
            .apply_filter(
                Some(ts("2022-01-01 00:00:00")),
                Some(ts("2022-12-31 23:59:59")),
            )
            .expect("filter applies");

        session.reset_sort();
        session.reset_filter();
        assert_eq!(session.table_path("HDFS_2k", false), "/get_csv/HDFS_2k?sort=&filter=,");
    }
}
