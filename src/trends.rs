//! Mood series for charts and summaries. Standalone check-ins and entry moods
//! are merged into one series before aggregation.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use time::{Date, Duration, OffsetDateTime};

use crate::model::{DiaryEntry, Mood, MoodSample};

const SPARK_LEVELS: [char; 5] = ['▁', '▂', '▄', '▆', '█'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartPoint {
    pub date: OffsetDateTime,
    pub mood: Mood,
    pub label: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyMood {
    pub day: Date,
    pub average: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSummary {
    pub count: usize,
    pub mean: Option<f64>,
    pub most_frequent: Option<Mood>,
    pub first: Option<OffsetDateTime>,
    pub last: Option<OffsetDateTime>,
}

/// Samples plus the moods of `entries`, newest first. Entries without a mood
/// contribute nothing.
pub fn merge_samples(mut samples: Vec<MoodSample>, entries: &[DiaryEntry]) -> Vec<MoodSample> {
    samples.extend(entries.iter().filter_map(MoodSample::from_entry));
    samples.sort_by(|a, b| b.date.cmp(&a.date));
    samples
}

/// Samples dated within the last `days` days of `now`. A window reaching past
/// the earliest representable date keeps everything.
pub fn within_days(samples: &[MoodSample], days: u32, now: OffsetDateTime) -> Vec<MoodSample> {
    let Some(cutoff) = now.checked_sub(Duration::days(i64::from(days))) else {
        return samples.to_vec();
    };
    samples
        .iter()
        .filter(|sample| sample.date >= cutoff)
        .cloned()
        .collect()
}

/// Oldest first.
pub fn chart_series(samples: &[MoodSample]) -> Vec<ChartPoint> {
    let mut points: Vec<ChartPoint> = samples
        .iter()
        .map(|sample| ChartPoint {
            date: sample.date,
            mood: sample.mood,
            label: sample.mood.label(),
        })
        .collect();
    points.sort_by(|a, b| a.date.cmp(&b.date));
    points
}

/// Mean mood code per UTC calendar day, oldest first.
pub fn daily_average(samples: &[MoodSample]) -> Vec<DailyMood> {
    let mut days: BTreeMap<Date, (u32, usize)> = BTreeMap::new();
    for sample in samples {
        let slot = days
            .entry(sample.date.to_offset(time::UtcOffset::UTC).date())
            .or_default();
        slot.0 += u32::from(sample.mood.code());
        slot.1 += 1;
    }
    days.into_iter()
        .map(|(day, (sum, count))| DailyMood {
            day,
            average: f64::from(sum) / count as f64,
            count,
        })
        .collect()
}

/// Count per mood, every mood present, in scale order.
pub fn distribution(samples: &[MoodSample]) -> IndexMap<Mood, usize> {
    let mut counts: IndexMap<Mood, usize> = Mood::ALL.iter().map(|mood| (*mood, 0)).collect();
    for sample in samples {
        *counts.entry(sample.mood).or_insert(0) += 1;
    }
    counts
}

/// The `n` newest samples, newest first.
pub fn recent(samples: &[MoodSample], n: usize) -> Vec<MoodSample> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    sorted.truncate(n);
    sorted
}

pub fn summary(samples: &[MoodSample]) -> TrendSummary {
    let count = samples.len();
    let mean = (count > 0).then(|| {
        let total: u32 = samples.iter().map(|s| u32::from(s.mood.code())).sum();
        f64::from(total) / count as f64
    });
    // ties resolve to the better (lower) code since the scan runs in scale order
    let most_frequent = distribution(samples)
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .fold(None::<(Mood, usize)>, |best, (mood, n)| match best {
            Some((_, top)) if top >= n => best,
            _ => Some((mood, n)),
        })
        .map(|(mood, _)| mood);
    TrendSummary {
        count,
        mean,
        most_frequent,
        first: samples.iter().map(|s| s.date).min(),
        last: samples.iter().map(|s| s.date).max(),
    }
}

/// One glyph per value; taller means a better mood. Values are mood codes or
/// averages of them.
pub fn render_sparkline<I>(values: I) -> String
where
    I: IntoIterator<Item = f64>,
{
    values
        .into_iter()
        .map(|value| {
            let clamped = value.clamp(1.0, 5.0);
            let level = (5.0 - clamped).round() as usize;
            SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
        })
        .collect()
}

/// The label closest to an average mood code.
pub fn nearest_mood(average: f64) -> Mood {
    let code = average.clamp(1.0, 5.0).round() as u8;
    Mood::try_from(code).unwrap_or(Mood::Neutral)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MOOD_TABLE;
    use time::macros::{date, datetime};

    fn sample(mood: Mood, at: OffsetDateTime) -> MoodSample {
        MoodSample {
            id: at.unix_timestamp().to_string(),
            date: at,
            mood,
            note: None,
        }
    }

    fn week() -> Vec<MoodSample> {
        vec![
            sample(Mood::Sad, datetime!(2024-03-02 20:00 UTC)),
            sample(Mood::Happy, datetime!(2024-03-01 08:00 UTC)),
            sample(Mood::Neutral, datetime!(2024-03-01 21:00 UTC)),
            sample(Mood::Happy, datetime!(2024-03-03 09:00 UTC)),
        ]
    }

    #[test]
    fn chart_series_is_ascending_with_table_labels() {
        let points = chart_series(&week());
        let dates: Vec<_> = points.iter().map(|p| p.date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
        for point in &points {
            let style = MOOD_TABLE
                .iter()
                .find(|style| style.mood == point.mood)
                .expect("every mood is in the table");
            assert_eq!(point.label, style.label);
        }
    }

    #[test]
    fn daily_average_groups_by_day() {
        let days = daily_average(&week());
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].day, date!(2024 - 03 - 01));
        assert_eq!(days[0].count, 2);
        assert!((days[0].average - 2.0).abs() < f64::EPSILON);
        assert!((days[1].average - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn distribution_lists_every_mood() {
        let counts = distribution(&week());
        let ordered: Vec<_> = counts.iter().map(|(m, n)| (*m, *n)).collect();
        assert_eq!(
            ordered,
            vec![
                (Mood::Happy, 2),
                (Mood::Excited, 0),
                (Mood::Neutral, 1),
                (Mood::Sad, 1),
                (Mood::Angry, 0),
            ]
        );
        assert!(distribution(&[]).values().all(|n| *n == 0));
    }

    #[test]
    fn summary_reports_mode_and_bounds() {
        let stats = summary(&week());
        assert_eq!(stats.count, 4);
        assert_eq!(stats.most_frequent, Some(Mood::Happy));
        assert_eq!(stats.first, Some(datetime!(2024-03-01 08:00 UTC)));
        assert_eq!(stats.last, Some(datetime!(2024-03-03 09:00 UTC)));
        assert!((stats.mean.unwrap_or_default() - 2.25).abs() < f64::EPSILON);

        let tie = vec![
            sample(Mood::Angry, datetime!(2024-03-01 08:00 UTC)),
            sample(Mood::Excited, datetime!(2024-03-02 08:00 UTC)),
        ];
        assert_eq!(summary(&tie).most_frequent, Some(Mood::Excited));

        let empty = summary(&[]);
        assert_eq!(empty.count, 0);
        assert_eq!(empty.mean, None);
        assert_eq!(empty.most_frequent, None);
    }

    #[test]
    fn recent_takes_newest() {
        let latest = recent(&week(), 2);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].date, datetime!(2024-03-03 09:00 UTC));
        assert_eq!(latest[1].date, datetime!(2024-03-02 20:00 UTC));
    }

    #[test]
    fn merge_includes_entry_moods_once() {
        let mut with_mood = DiaryEntry::new(None).with_mood(Some(Mood::Angry));
        with_mood.date = datetime!(2024-03-04 10:00 UTC);
        let without_mood = DiaryEntry::new(None);
        let merged = merge_samples(week(), &[with_mood.clone(), without_mood]);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged[0].id, format!("entry-{}", with_mood.id));
        assert_eq!(merged[0].mood, Mood::Angry);
    }

    #[test]
    fn within_days_drops_older_samples() {
        let now = datetime!(2024-03-03 12:00 UTC);
        let kept = within_days(&week(), 1, now);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn within_days_without_lower_bound_keeps_everything() {
        let now = datetime!(2024-03-03 12:00 UTC);
        assert_eq!(within_days(&week(), 5_000_000, now).len(), 4);
        assert_eq!(within_days(&week(), u32::MAX, now).len(), 4);
    }

    #[test]
    fn sparkline_rises_with_better_moods() {
        assert_eq!(render_sparkline([5.0, 4.0, 3.0, 2.0, 1.0]), "▁▂▄▆█");
        assert_eq!(render_sparkline([2.25]), "▆");
        assert_eq!(render_sparkline(Vec::<f64>::new()), "");
        assert_eq!(nearest_mood(2.4), Mood::Excited);
        assert_eq!(nearest_mood(9.0), Mood::Angry);
    }
}
