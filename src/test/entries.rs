#[cfg(test)]
mod tests {
    use crate::aggregate::aggregate_school;
    use crate::db::{
        append_lesson, append_mood, get_lesson_entries, get_lesson_entries_between,
        get_mood_entries,
    };
    use crate::error::AppError;
    use crate::models::{DuplicateDatePolicy, NewLessonEntry, NewMoodEntry, TagCount};
    use crate::test::test_utils::{TestDbBuilder, create_standard_test_db, date, tag_set};
    use rocket::tokio;

    #[tokio::test]
    async fn test_mood_entries_read_back_in_order() {
        let test_db = TestDbBuilder::new()
            .user("jan")
            .build()
            .await
            .expect("Failed to build test database");
        let jan = test_db.user_id("jan").unwrap();

        let submitted = [
            (date(2025, 3, 5), 7, 3),
            (date(2025, 3, 3), 5, 6),
            (date(2025, 3, 4), 9, 1),
            (date(2025, 3, 4), 2, 9),
        ];

        for (entry_date, energy, stress) in submitted {
            let entry = NewMoodEntry {
                entry_date,
                energy,
                stress,
                mental_clarity: None,
                class_label: None,
            };
            append_mood(&test_db.pool, jan, &entry, DuplicateDatePolicy::Allow)
                .await
                .expect("Failed to append mood entry");
        }

        let stored = get_mood_entries(&test_db.pool, jan)
            .await
            .expect("Failed to read mood entries");

        assert_eq!(stored.len(), submitted.len());

        let values: Vec<_> = stored
            .iter()
            .map(|e| (e.entry_date, e.energy, e.stress))
            .collect();
        assert_eq!(
            values,
            vec![
                (date(2025, 3, 3), 5, 6),
                (date(2025, 3, 4), 9, 1),
                (date(2025, 3, 4), 2, 9),
                (date(2025, 3, 5), 7, 3),
            ]
        );
        assert!(stored.iter().all(|e| e.user_id == jan));
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_second_entry_for_date() {
        let test_db = TestDbBuilder::new()
            .user("jan")
            .user("els")
            .build()
            .await
            .expect("Failed to build test database");
        let jan = test_db.user_id("jan").unwrap();
        let els = test_db.user_id("els").unwrap();

        let entry = NewMoodEntry {
            entry_date: date(2025, 3, 3),
            energy: 5,
            stress: 5,
            mental_clarity: Some(6),
            class_label: None,
        };

        append_mood(&test_db.pool, jan, &entry, DuplicateDatePolicy::Reject)
            .await
            .expect("First entry for the date should be accepted");

        let second = append_mood(&test_db.pool, jan, &entry, DuplicateDatePolicy::Reject).await;
        assert!(matches!(second, Err(AppError::DuplicateEntry(_))));

        append_mood(&test_db.pool, els, &entry, DuplicateDatePolicy::Reject)
            .await
            .expect("Another teacher may log the same date");

        let stored = get_mood_entries(&test_db.pool, jan).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].mental_clarity, Some(6));
    }

    #[tokio::test]
    async fn test_lesson_tags_round_trip_as_sets() {
        let test_db = TestDbBuilder::new()
            .user("jan")
            .build()
            .await
            .expect("Failed to build test database");
        let jan = test_db.user_id("jan").unwrap();

        let entry = NewLessonEntry {
            lesson_date: date(2025, 3, 3),
            class_label: "5HW".to_string(),
            lesson_approach: 4,
            classroom_management: 2,
            positive_tags: tag_set(&["rustig", " rustig ", "actief"]),
            negative_tags: tag_set(&["lawaai", ""]),
        };

        let stored = append_lesson(&test_db.pool, jan, &entry)
            .await
            .expect("Failed to append lesson");
        assert!(stored.id > 0);

        let lessons = get_lesson_entries(&test_db.pool, jan).await.unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0], stored);
        assert_eq!(lessons[0].positive_tags, tag_set(&["actief", "rustig"]));
        assert_eq!(lessons[0].negative_tags, tag_set(&["lawaai"]));
    }

    #[tokio::test]
    async fn test_teachers_only_see_their_own_rows() {
        let test_db = create_standard_test_db().await;
        let jan = test_db.user_id("jan").unwrap();
        let els = test_db.user_id("els").unwrap();
        let director = test_db.user_id("directie.marleen").unwrap();

        let jan_moods = get_mood_entries(&test_db.pool, jan).await.unwrap();
        let jan_lessons = get_lesson_entries(&test_db.pool, jan).await.unwrap();
        assert_eq!(jan_moods.len(), 2);
        assert_eq!(jan_lessons.len(), 1);
        assert!(jan_moods.iter().all(|e| e.user_id == jan));
        assert!(jan_lessons.iter().all(|e| e.user_id == jan));

        let els_lessons = get_lesson_entries(&test_db.pool, els).await.unwrap();
        assert_eq!(els_lessons.len(), 2);
        assert!(els_lessons.iter().all(|e| e.user_id == els));
        assert!(!els_lessons.iter().any(|l| l.negative_tags.contains("lawaai")));

        assert!(get_mood_entries(&test_db.pool, director).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_school_aggregation_over_all_teachers() {
        let test_db = create_standard_test_db().await;

        let overview = aggregate_school(&test_db.pool).await.unwrap();
        assert_eq!(overview.teacher_count, 2);

        let labels: Vec<&str> = overview
            .classes
            .iter()
            .map(|c| c.class_label.as_str())
            .collect();
        assert_eq!(labels, vec!["5MT", "6WEWI"]);

        let five_mt = &overview.classes[0];
        assert_eq!(five_mt.entries, 2);
        assert_eq!(five_mt.classroom_management, Some(4.0));
        assert_eq!(five_mt.lesson_approach, Some(3.0));

        assert_eq!(overview.mood.entries, 3);
        assert_eq!(overview.mood.energy, Some(6.0));
        assert_eq!(overview.mood.stress, Some(4.33));
        assert_eq!(overview.mood.mental_clarity, None);

        assert_eq!(
            overview.positive_tags,
            vec![
                TagCount {
                    tag: "rustig".to_string(),
                    count: 2
                },
                TagCount {
                    tag: "actief".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_lessons_between_dates() {
        let test_db = create_standard_test_db().await;

        let march = get_lesson_entries_between(&test_db.pool, date(2025, 3, 1), date(2025, 3, 31))
            .await
            .unwrap();

        assert_eq!(march.len(), 2);
        assert!(march.iter().all(|l| l.class_label == "5MT"));
        assert!(march.iter().any(|l| l.positive_tags.contains("actief")));
    }
}
