use std::collections::{BTreeMap, HashMap};

use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::Role;
use crate::db::{count_users_by_role, get_all_lesson_entries, get_all_mood_entries};
use crate::error::AppError;
use crate::models::{
    ClassAverages, LessonEntry, MoodAverages, MoodEntry, SchoolOverview, TagCount, TagPolarity,
};

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = i64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0i64, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        None
    } else {
        Some(round2(sum as f64 / count as f64))
    }
}

fn averages(label: &str, lessons: &[&LessonEntry], moods: &[&MoodEntry]) -> ClassAverages {
    ClassAverages {
        class_label: label.to_string(),
        entries: lessons.len(),
        lesson_approach: mean(lessons.iter().map(|l| l.lesson_approach)),
        classroom_management: mean(lessons.iter().map(|l| l.classroom_management)),
        mood_entries: moods.len(),
        energy: mean(moods.iter().map(|m| m.energy)),
        stress: mean(moods.iter().map(|m| m.stress)),
        mental_clarity: mean(moods.iter().filter_map(|m| m.mental_clarity)),
    }
}

// Mood entries without a class only count towards school-wide means.
pub fn class_averages(lessons: &[LessonEntry], moods: &[MoodEntry]) -> Vec<ClassAverages> {
    let mut by_class: BTreeMap<&str, (Vec<&LessonEntry>, Vec<&MoodEntry>)> = BTreeMap::new();

    for lesson in lessons {
        by_class
            .entry(lesson.class_label.as_str())
            .or_default()
            .0
            .push(lesson);
    }

    for mood in moods {
        if let Some(class_label) = mood.class_label.as_deref() {
            by_class.entry(class_label).or_default().1.push(mood);
        }
    }

    by_class
        .into_iter()
        .map(|(class_label, (lessons, moods))| averages(class_label, &lessons, &moods))
        .collect()
}

pub fn overall_averages(
    lessons: &[LessonEntry],
    moods: &[MoodEntry],
    label: &str,
) -> ClassAverages {
    let lessons: Vec<&LessonEntry> = lessons.iter().collect();
    let moods: Vec<&MoodEntry> = moods.iter().collect();
    averages(label, &lessons, &moods)
}

pub fn mood_averages(entries: &[MoodEntry]) -> MoodAverages {
    MoodAverages {
        entries: entries.len(),
        energy: mean(entries.iter().map(|e| e.energy)),
        stress: mean(entries.iter().map(|e| e.stress)),
        mental_clarity: mean(entries.iter().filter_map(|e| e.mental_clarity)),
    }
}

// Most frequent first, ties by name.
pub fn tag_counts(lessons: &[LessonEntry], polarity: TagPolarity) -> Vec<TagCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for lesson in lessons {
        let tags = match polarity {
            TagPolarity::Positive => &lesson.positive_tags,
            TagPolarity::Negative => &lesson.negative_tags,
        };
        for tag in tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }

    let mut counts: Vec<TagCount> = counts
        .into_iter()
        .map(|(tag, count)| TagCount {
            tag: tag.to_string(),
            count,
        })
        .collect();

    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    counts
}

#[instrument(skip(pool))]
pub async fn aggregate_school(pool: &Pool<Sqlite>) -> Result<SchoolOverview, AppError> {
    let lessons = get_all_lesson_entries(pool).await?;
    let moods = get_all_mood_entries(pool).await?;
    let teacher_count = count_users_by_role(pool, Role::Teacher).await?;

    info!(
        lessons = lessons.len(),
        moods = moods.len(),
        teacher_count,
        "Aggregating school overview"
    );

    Ok(SchoolOverview {
        teacher_count,
        classes: class_averages(&lessons, &moods),
        mood: mood_averages(&moods),
        positive_tags: tag_counts(&lessons, TagPolarity::Positive),
        negative_tags: tag_counts(&lessons, TagPolarity::Negative),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::clean_tags;
    use chrono::{NaiveDate, Utc};

    fn lesson(user_id: i64, class: &str, approach: i64, management: i64) -> LessonEntry {
        LessonEntry {
            id: 0,
            user_id,
            lesson_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            class_label: class.to_string(),
            lesson_approach: approach,
            classroom_management: management,
            positive_tags: Default::default(),
            negative_tags: Default::default(),
            created_at: Utc::now(),
        }
    }

    fn mood(energy: i64, stress: i64, clarity: Option<i64>) -> MoodEntry {
        MoodEntry {
            id: 0,
            user_id: 1,
            entry_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            energy,
            stress,
            mental_clarity: clarity,
            class_label: None,
            created_at: Utc::now(),
        }
    }

    fn class_mood(class: &str, energy: i64, stress: i64, clarity: Option<i64>) -> MoodEntry {
        MoodEntry {
            class_label: Some(class.to_string()),
            ..mood(energy, stress, clarity)
        }
    }

    #[test]
    fn test_class_means_across_teachers() {
        let lessons = vec![lesson(1, "5MT", 2, 3), lesson(2, "5MT", 4, 5)];

        let averages = class_averages(&lessons, &[]);

        assert_eq!(averages.len(), 1);
        assert_eq!(averages[0].class_label, "5MT");
        assert_eq!(averages[0].entries, 2);
        assert_eq!(averages[0].classroom_management, Some(4.0));
        assert_eq!(averages[0].lesson_approach, Some(3.0));
    }

    #[test]
    fn test_class_means_are_sorted_and_rounded() {
        let lessons = vec![
            lesson(1, "6MT", 1, 1),
            lesson(1, "5HW", 1, 2),
            lesson(2, "5HW", 2, 2),
            lesson(3, "5HW", 2, 3),
        ];

        let averages = class_averages(&lessons, &[]);
        let labels: Vec<&str> = averages.iter().map(|a| a.class_label.as_str()).collect();

        assert_eq!(labels, vec!["5HW", "6MT"]);
        assert_eq!(averages[0].lesson_approach, Some(1.67));
        assert_eq!(averages[0].classroom_management, Some(2.33));
    }

    #[test]
    fn test_overall_means_weigh_each_lesson_once() {
        let lessons = vec![
            lesson(1, "5MT", 1, 1),
            lesson(2, "5MT", 1, 1),
            lesson(3, "6MT", 4, 4),
        ];

        let overall = overall_averages(&lessons, &[mood(6, 3, None)], "all");

        assert_eq!(overall.entries, 3);
        assert_eq!(overall.lesson_approach, Some(2.0));
        assert_eq!(overall.classroom_management, Some(2.0));
        assert_eq!(overall.mood_entries, 1);
        assert_eq!(overall.energy, Some(6.0));
    }

    #[test]
    fn test_empty_input_has_no_averages() {
        assert!(class_averages(&[], &[]).is_empty());
        assert_eq!(mood_averages(&[]), MoodAverages::default());
    }

    #[test]
    fn test_class_rows_include_mood_means() {
        let lessons = vec![lesson(1, "5MT", 3, 3)];
        let moods = vec![
            class_mood("5MT", 6, 4, Some(7)),
            class_mood("5MT", 8, 2, None),
            class_mood("6WEWI", 3, 9, Some(2)),
            mood(10, 10, Some(10)),
        ];

        let averages = class_averages(&lessons, &moods);
        let labels: Vec<&str> = averages.iter().map(|a| a.class_label.as_str()).collect();
        assert_eq!(labels, vec!["5MT", "6WEWI"]);

        assert_eq!(averages[0].entries, 1);
        assert_eq!(averages[0].mood_entries, 2);
        assert_eq!(averages[0].energy, Some(7.0));
        assert_eq!(averages[0].stress, Some(3.0));
        assert_eq!(averages[0].mental_clarity, Some(7.0));

        assert_eq!(averages[1].entries, 0);
        assert_eq!(averages[1].lesson_approach, None);
        assert_eq!(averages[1].stress, Some(9.0));
    }

    #[test]
    fn test_mood_clarity_mean_ignores_missing_values() {
        let entries = vec![mood(6, 3, Some(7)), mood(8, 5, None), mood(4, 4, Some(8))];

        let averages = mood_averages(&entries);

        assert_eq!(averages.entries, 3);
        assert_eq!(averages.energy, Some(6.0));
        assert_eq!(averages.stress, Some(4.0));
        assert_eq!(averages.mental_clarity, Some(7.5));

        let without_clarity = mood_averages(&[mood(5, 5, None)]);
        assert_eq!(without_clarity.mental_clarity, None);
    }

    #[test]
    fn test_tag_counts_order() {
        let mut a = lesson(1, "5MT", 3, 3);
        a.positive_tags = clean_tags(["rustig", "gemotiveerd"]);
        let mut b = lesson(2, "6MT", 3, 3);
        b.positive_tags = clean_tags(["gemotiveerd"]);
        b.negative_tags = clean_tags(["lawaai"]);

        let positive = tag_counts(&[a.clone(), b.clone()], TagPolarity::Positive);
        assert_eq!(
            positive,
            vec![
                TagCount {
                    tag: "gemotiveerd".to_string(),
                    count: 2
                },
                TagCount {
                    tag: "rustig".to_string(),
                    count: 1
                },
            ]
        );

        let negative = tag_counts(&[a, b], TagPolarity::Negative);
        assert_eq!(negative.len(), 1);
        assert_eq!(negative[0].tag, "lawaai");
    }
}
