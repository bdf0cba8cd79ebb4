//! Store overview: coverage, sample density and delivery state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::TimeZone;

use crate::publish::Destination;
use crate::quarter::quarter_start;
use crate::sample::Quarter;

/// Quarters sharing one sample count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountRow {
    /// Samples per quarter.
    pub sample_count: u32,
    /// Quarters with that many samples.
    pub quarters: usize,
    /// Per destination, in configuration order: how many of those quarters
    /// it has acknowledged.
    pub acknowledged: Vec<usize>,
}

/// Summary of the quarter table.
///
/// The newest quarter is reported in the range but left out of the tallies
/// because it may still be receiving samples.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Summary {
    /// Lowest and highest quarter index.
    pub range: Option<(i64, i64)>,
    /// Destination codes, in configuration order.
    pub destinations: Vec<String>,
    /// One row per distinct sample count, ascending.
    pub rows: Vec<CountRow>,
    /// Quarters tallied.
    pub total: usize,
    /// Lengths of runs of empty quarters that were followed by data.
    pub gaps: Vec<usize>,
}

impl Summary {
    /// Builds the summary from quarters in index order.
    pub fn build(quarters: &[Quarter], destinations: &[Destination]) -> Self {
        let range = quarters.first().zip(quarters.last()).map(|(a, b)| (a.index, b.index));
        let mut summary = Self {
            range,
            destinations: destinations.iter().map(|d| d.code.clone()).collect(),
            ..Self::default()
        };

        let Some((_, last)) = range else {
            return summary;
        };

        let mut rows: BTreeMap<u32, CountRow> = BTreeMap::new();
        let mut gap = 0;
        for quarter in quarters.iter().filter(|q| q.index < last) {
            summary.total += 1;

            if quarter.has_data() {
                if gap > 0 {
                    summary.gaps.push(gap);
                    gap = 0;
                }
            } else {
                gap += 1;
            }

            let row = rows.entry(quarter.sample_count).or_insert_with(|| CountRow {
                sample_count: quarter.sample_count,
                quarters: 0,
                acknowledged: vec![0; destinations.len()],
            });
            row.quarters += 1;
            for (count, destination) in row.acknowledged.iter_mut().zip(destinations) {
                if quarter.ack_mask.contains(destination.mask()) {
                    *count += 1;
                }
            }
        }

        summary.rows = rows.into_values().collect();
        summary
    }
}

fn local_day_time(index: i64) -> String {
    chrono::Local
        .timestamp_opt(quarter_start(index), 0)
        .single()
        .map_or_else(String::new, |t| t.format("%a %Y-%m-%d %H:%M:%S").to_string())
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((first, last)) = self.range else {
            return writeln!(f, "no quarters");
        };

        writeln!(f, "Quarter [{first}..{last}]")?;
        writeln!(f)?;
        writeln!(f, "Quarter {first} is {}", local_day_time(first))?;
        writeln!(f, "Quarter {last} is {}", local_day_time(last))?;
        writeln!(f)?;

        write!(f, "Samples  Quarters")?;
        for code in &self.destinations {
            write!(f, "  {code:>8}")?;
        }
        writeln!(f)?;

        for row in &self.rows {
            write!(f, "{:7}  {:8}", row.sample_count, row.quarters)?;
            for count in &row.acknowledged {
                write!(f, "  {count:>8}")?;
            }
            writeln!(f)?;
        }

        let gaps: Vec<String> = self.gaps.iter().map(ToString::to_string).collect();
        writeln!(f, "         --------")?;
        writeln!(f, "         {:8}, [{}] gaps", self.total, gaps.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::AckMask;

    fn quarter(index: i64, samples: u32, mask: u8) -> Quarter {
        Quarter {
            sample_count: samples,
            ack_mask: AckMask::from_bits(mask),
            ..Quarter::empty(index)
        }
    }

    fn destinations() -> Vec<Destination> {
        vec![
            Destination::new("wu", 0, "http://wu.invalid"),
            Destination::new("ps", 1, "http://ps.invalid"),
        ]
    }

    #[test]
    fn test_summary_tallies_and_gaps() {
        let quarters = vec![
            quarter(10, 15, 0x03),
            quarter(11, 0, 0x00),
            quarter(12, 0, 0x00),
            quarter(13, 15, 0x01),
            quarter(14, 0, 0x00),
            quarter(15, 3, 0x00),
            quarter(16, 0, 0x00),
            // Newest quarter, still filling.
            quarter(17, 2, 0x00),
        ];

        let summary = Summary::build(&quarters, &destinations());

        assert_eq!(summary.range, Some((10, 17)));
        assert_eq!(summary.total, 7);
        assert_eq!(summary.gaps, vec![2, 1]);
        assert_eq!(
            summary.rows,
            vec![
                CountRow { sample_count: 0, quarters: 4, acknowledged: vec![0, 0] },
                CountRow { sample_count: 3, quarters: 1, acknowledged: vec![0, 0] },
                CountRow { sample_count: 15, quarters: 2, acknowledged: vec![2, 1] },
            ]
        );
    }

    #[test]
    fn test_summary_empty() {
        let summary = Summary::build(&[], &destinations());
        assert_eq!(summary.range, None);
        assert_eq!(summary.to_string(), "no quarters\n");
    }

    #[test]
    fn test_summary_render() {
        let quarters = vec![quarter(1, 15, 0x03), quarter(2, 0, 0x00), quarter(3, 9, 0x00), quarter(4, 1, 0)];

        let text = Summary::build(&quarters, &destinations()).to_string();

        assert!(text.starts_with("Quarter [1..4]\n"));
        assert!(text.contains("Samples  Quarters        wu        ps\n"));
        assert!(text.contains("     15         1         1         1\n"));
        assert!(text.ends_with("                3, [1] gaps\n"));
    }
}
