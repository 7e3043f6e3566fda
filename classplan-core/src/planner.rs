use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{ClassplanError, CoreResult};
use crate::generate::GenerationSource;
use crate::model::{Day, Student, Task, TeacherProfile, now_ms};
use crate::normalizer::normalize_message;
use crate::store::DocumentStore;

/// Everything the prompt builder knows about the requesting teacher.
#[derive(Debug, Clone, Default)]
pub struct PlannerContext {
    pub teacher_name: String,
    pub profile: Option<TeacherProfile>,
    pub students: Vec<Student>,
}

/// Load the teacher's profile and roster. Missing pieces degrade to an
/// emptier context rather than failing the request; the model still gets
/// the message itself.
pub async fn gather_context(store: &dyn DocumentStore, uid: &str) -> CoreResult<PlannerContext> {
    let mut ctx = PlannerContext::default();

    if let Some(doc) = store.get("users", uid).await? {
        if let Some(name) = doc.get("name").and_then(Value::as_str) {
            ctx.teacher_name = name.to_string();
        }
        if let Some(profile) = doc.get("profile") {
            match serde_json::from_value::<TeacherProfile>(profile.clone()) {
                Ok(p) => ctx.profile = Some(p),
                Err(err) => tracing::warn!(%err, uid, "ignoring unreadable profile"),
            }
        }
    }

    for doc in store
        .query_eq("students", "userId", &Value::String(uid.to_string()))
        .await?
    {
        match serde_json::from_value::<Student>(doc) {
            Ok(s) => ctx.students.push(s),
            Err(err) => tracing::warn!(%err, uid, "skipping unreadable student record"),
        }
    }
    ctx.students
        .sort_by(|a, b| a.last_name.cmp(&b.last_name).then(a.first_name.cmp(&b.first_name)));
    Ok(ctx)
}

/// Assemble the planning prompt. The message is normalized first; an empty
/// result is a validation error.
pub fn build_prompt(message: &str, ctx: &PlannerContext) -> CoreResult<String> {
    let message = normalize_message(message);
    if message.is_empty() {
        return Err(ClassplanError::Validation("message must not be empty".into()));
    }

    let mut prompt = String::from(
        "You are a planning assistant for a multi-grade classroom teacher. \
         Answer in the teacher's language and keep suggestions practical.\n\n",
    );
    if !ctx.teacher_name.is_empty() {
        prompt.push_str(&format!("Teacher: {}\n", ctx.teacher_name));
    }
    if let Some(profile) = &ctx.profile {
        if !profile.specializations.is_empty() {
            prompt.push_str(&format!(
                "Specializations: {}\n",
                profile.specializations.join(", ")
            ));
        }
        if !profile.teaching_style.is_empty() {
            prompt.push_str(&format!("Teaching style: {}\n", profile.teaching_style));
        }
        if !profile.available_time.is_empty() {
            prompt.push_str(&format!("Available time: {}\n", profile.available_time));
        }
        if !profile.facilities.is_empty() {
            prompt.push_str(&format!("Facilities: {}\n", profile.facilities.join(", ")));
        }
        if !profile.language.is_empty() {
            prompt.push_str(&format!("Preferred language: {}\n", profile.language));
        }
    }
    if !ctx.students.is_empty() {
        prompt.push_str("\nStudents:\n");
        for s in &ctx.students {
            prompt.push_str(&format!(
                "- {} {} (grade {}, age {})",
                s.first_name, s.last_name, s.grade, s.age
            ));
            if !s.preferred_learning_style.is_empty() {
                prompt.push_str(&format!(", learns best {}", s.preferred_learning_style));
            }
            if !s.special_needs_or_accommodations.is_empty() {
                prompt.push_str(&format!(
                    ", accommodations: {}",
                    s.special_needs_or_accommodations
                ));
            }
            prompt.push('\n');
        }
    }
    let mut grades: Vec<&str> = ctx.students.iter().map(|s| s.grade.as_str()).collect();
    grades.sort_unstable();
    grades.dedup();
    let mut wrote_header = false;
    for grade in grades {
        for (subject, topics) in syllabus_topics(grade) {
            if !wrote_header {
                prompt.push_str("\nSyllabus:\n");
                wrote_header = true;
            }
            prompt.push_str(&format!(
                "- grade {grade} {subject}: {}\n",
                topics.join(", ")
            ));
        }
    }

    prompt.push_str(&format!("\nRequest: {message}\n"));
    Ok(prompt)
}

/// Per-grade syllabus topics. Static for now; a store collection can
/// replace this without changing the prompt shape.
fn syllabus_topics(grade: &str) -> &'static [(&'static str, &'static [&'static str])] {
    match grade {
        "1" => &[
            ("math", &["counting", "addition"]),
            ("science", &["plants", "animals"]),
        ],
        "2" => &[
            ("math", &["subtraction", "multiplication"]),
            ("science", &["water cycle", "food chain"]),
        ],
        "3" => &[
            ("math", &["division", "fractions"]),
            ("science", &["solar system", "human body"]),
        ],
        _ => &[],
    }
}

// Greedy: matches the outermost bracket pair in the reply.
static JSON_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[\s\S]*\]").expect("static pattern compiles"));

/// Strip Markdown code fences around a model reply, if present.
fn strip_fences(raw: &str) -> &str {
    let t = raw.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    t.strip_suffix("```").unwrap_or(t).trim()
}

/// Pull the schedule days out of a free-form model reply. Models wrap JSON
/// in prose and fences; the first JSON array found is taken. No parseable
/// array is a generation failure the caller surfaces to the client.
pub fn extract_plan(raw: &str) -> CoreResult<Vec<Day>> {
    let body = strip_fences(raw);
    let json = JSON_ARRAY
        .find(body)
        .map(|m| m.as_str())
        .unwrap_or(body);
    serde_json::from_str::<Vec<Day>>(json).map_err(|err| {
        ClassplanError::Generation(format!("model reply was not a schedule: {err}"))
    })
}

/// Generate tasks for a teacher. Any failure, upstream or parse, falls back
/// to a deterministic set derived from the teacher's subjects and roster;
/// this path never blocks on a model.
pub async fn generate_tasks(source: &dyn GenerationSource, ctx: &PlannerContext) -> Vec<Task> {
    let prompt = match task_prompt(ctx) {
        Ok(p) => p,
        Err(_) => return fallback_tasks(ctx),
    };
    let reply = match source.complete(&prompt).await {
        Ok(r) => r,
        Err(err) => {
            tracing::warn!(%err, "task generation failed, using fallback tasks");
            return fallback_tasks(ctx);
        }
    };
    match parse_tasks(&reply) {
        Ok(tasks) if !tasks.is_empty() => tasks,
        Ok(_) => fallback_tasks(ctx),
        Err(err) => {
            tracing::warn!(%err, "task reply unparseable, using fallback tasks");
            fallback_tasks(ctx)
        }
    }
}

fn task_prompt(ctx: &PlannerContext) -> CoreResult<String> {
    let mut p = build_prompt(
        "Generate 5-7 relevant, actionable tasks that will help this teacher \
         manage their classroom effectively. Cover a mix of lesson planning, \
         student assessment, individual support, and classroom management, \
         paying special attention to students with accommodations or learning \
         style preferences. Reply with ONLY a JSON array of objects with \
         fields: title, type, status.",
        ctx,
    )?;
    p.push_str("\nstatus must be \"pending\".\n");
    Ok(p)
}

fn parse_tasks(raw: &str) -> CoreResult<Vec<Task>> {
    #[derive(serde::Deserialize)]
    struct Sketch {
        title: String,
        #[serde(rename = "type", default)]
        kind: String,
        #[serde(default)]
        status: String,
    }

    let body = strip_fences(raw);
    let json = JSON_ARRAY.find(body).map(|m| m.as_str()).unwrap_or(body);
    let sketches: Vec<Sketch> = serde_json::from_str(json).map_err(|err| {
        ClassplanError::Generation(format!("model reply was not a task list: {err}"))
    })?;

    let base = now_ms();
    Ok(sketches
        .into_iter()
        .enumerate()
        .map(|(i, s)| Task {
            id: format!("{}", base + i as i64),
            title: s.title,
            kind: if s.kind.is_empty() { "general".into() } else { s.kind },
            status: if s.status.is_empty() { "pending".into() } else { s.status },
            created_at_ms: base,
            is_ai_generated: true,
        })
        .collect())
}

/// Deterministic tasks used when generation is unavailable: base tasks
/// derived from the teacher's subjects, plus support tasks for up to two
/// students with recorded accommodations or notes.
pub fn fallback_tasks(ctx: &PlannerContext) -> Vec<Task> {
    let defaults = ["Math", "Science", "English"];
    let subjects: Vec<&str> = match ctx.profile.as_ref() {
        Some(p) if !p.specializations.is_empty() => {
            p.specializations.iter().map(String::as_str).collect()
        }
        _ => defaults.to_vec(),
    };
    let second = subjects.get(1).copied().unwrap_or(subjects[0]);

    let mut drafts = vec![
        (
            format!("Review {} concepts for lesson planning", subjects[0]),
            "planning",
        ),
        (
            format!("Assess student progress in {second}"),
            "assessment",
        ),
        ("Plan weekly classroom activities".to_string(), "planning"),
    ];

    let needing_attention = ctx.students.iter().filter(|s| {
        !s.special_needs_or_accommodations.is_empty() || !s.additional_notes.is_empty()
    });
    for student in needing_attention.take(2) {
        drafts.push((
            format!(
                "Prepare individual support for {} {}",
                student.first_name, student.last_name
            ),
            "support",
        ));
    }

    let base = now_ms();
    drafts
        .into_iter()
        .enumerate()
        .map(|(i, (title, kind))| Task {
            id: format!("{}", base + i as i64),
            title,
            kind: kind.to_string(),
            status: "pending".to_string(),
            created_at_ms: base,
            is_ai_generated: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::CannedSource;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn gather_context_reads_profile_and_roster() {
        let store = MemoryStore::new();
        store
            .set(
                "users",
                "t1",
                json!({
                    "uid": "t1",
                    "name": "Asha",
                    "profile": {
                        "specializations": ["math"],
                        "teachingStyle": "hands-on",
                        "availableTime": "mornings",
                        "facilities": ["blackboard"],
                        "language": "mr"
                    }
                }),
            )
            .await
            .unwrap();
        store
            .set(
                "students",
                "s1",
                json!({
                    "id": "s1", "firstName": "Mira", "lastName": "Patil",
                    "grade": "2", "age": 7, "userId": "t1"
                }),
            )
            .await
            .unwrap();
        store
            .set(
                "students",
                "s2",
                json!({
                    "id": "s2", "firstName": "Dev", "lastName": "Kale",
                    "grade": "1", "age": 6, "userId": "other"
                }),
            )
            .await
            .unwrap();

        let ctx = gather_context(&store, "t1").await.unwrap();
        assert_eq!(ctx.teacher_name, "Asha");
        assert_eq!(ctx.profile.as_ref().unwrap().language, "mr");
        assert_eq!(ctx.students.len(), 1);
        assert_eq!(ctx.students[0].first_name, "Mira");
    }

    #[tokio::test]
    async fn gather_context_with_no_user_is_empty_not_error() {
        let store = MemoryStore::new();
        let ctx = gather_context(&store, "ghost").await.unwrap();
        assert!(ctx.teacher_name.is_empty());
        assert!(ctx.profile.is_none());
        assert!(ctx.students.is_empty());
    }

    #[test]
    fn build_prompt_includes_context() {
        let ctx = PlannerContext {
            teacher_name: "Asha".into(),
            profile: Some(TeacherProfile {
                specializations: vec!["math".into(), "science".into()],
                teaching_style: "hands-on".into(),
                available_time: "mornings".into(),
                facilities: vec!["blackboard".into()],
                language: "mr".into(),
            }),
            students: vec![Student {
                id: "s1".into(),
                first_name: "Mira".into(),
                last_name: "Patil".into(),
                grade: "2".into(),
                age: 7,
                preferred_learning_style: "visually".into(),
                special_needs_or_accommodations: String::new(),
                additional_notes: String::new(),
                summary: String::new(),
                user_id: "t1".into(),
            }],
        };
        let prompt = build_prompt("  plan my week  ", &ctx).unwrap();
        assert!(prompt.contains("Teacher: Asha"));
        assert!(prompt.contains("math, science"));
        assert!(prompt.contains("Mira Patil (grade 2, age 7)"));
        assert!(prompt.contains("grade 2 science: water cycle, food chain"));
        assert!(prompt.ends_with("Request: plan my week\n"));
    }

    #[test]
    fn unknown_grades_get_no_syllabus_section() {
        let ctx = PlannerContext {
            students: vec![Student {
                id: "s1".into(),
                first_name: "Ira".into(),
                last_name: "Shah".into(),
                grade: "9".into(),
                age: 14,
                preferred_learning_style: String::new(),
                special_needs_or_accommodations: String::new(),
                additional_notes: String::new(),
                summary: String::new(),
                user_id: "t1".into(),
            }],
            ..PlannerContext::default()
        };
        let prompt = build_prompt("plan", &ctx).unwrap();
        assert!(!prompt.contains("Syllabus:"));
    }

    #[test]
    fn empty_message_is_rejected() {
        let err = build_prompt("   \r\n ", &PlannerContext::default()).unwrap_err();
        assert!(matches!(err, ClassplanError::Validation(_)));
    }

    #[test]
    fn extract_plan_handles_fenced_json() {
        let raw = "Here is your plan:\n```json\n[{\"name\":\"Monday\",\"status\":\"planned\",\"activities\":[]}]\n```\nEnjoy!";
        let days = extract_plan(raw).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].name, "Monday");
    }

    #[test]
    fn extract_plan_finds_array_inside_prose() {
        let raw = "Sure. [{\"name\":\"Tuesday\",\"status\":\"planned\"}] Let me know.";
        let days = extract_plan(raw).unwrap();
        assert_eq!(days[0].name, "Tuesday");
    }

    #[test]
    fn extract_plan_without_array_is_generation_error() {
        let err = extract_plan("I could not produce a plan today.").unwrap_err();
        assert!(matches!(err, ClassplanError::Generation(_)));
    }

    #[tokio::test]
    async fn generate_tasks_parses_model_reply() {
        let src = CannedSource::new([
            "```json\n[{\"title\":\"Plan week\",\"type\":\"planning\",\"status\":\"pending\"}]\n```",
        ]);
        let tasks = generate_tasks(&src, &PlannerContext::default()).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Plan week");
        assert!(tasks[0].is_ai_generated);
    }

    #[tokio::test]
    async fn generate_tasks_falls_back_on_failure() {
        let src = CannedSource::failing(Vec::<String>::new(), "quota exhausted");
        let tasks = generate_tasks(&src, &PlannerContext::default()).await;
        assert_eq!(tasks.len(), 3);
        assert!(tasks[0].title.contains("Math"));
        assert!(tasks[1].title.contains("Science"));
        assert!(tasks.iter().all(|t| t.status == "pending"));
    }

    #[tokio::test]
    async fn generate_tasks_falls_back_on_prose_reply() {
        let src = CannedSource::new(["I suggest planning your week first."]);
        let tasks = generate_tasks(&src, &PlannerContext::default()).await;
        assert_eq!(tasks.len(), 3);
    }

    #[test]
    fn fallback_tasks_derive_from_subjects_and_roster() {
        let student = |first: &str, last: &str, needs: &str| Student {
            id: format!("{first}-{last}"),
            first_name: first.into(),
            last_name: last.into(),
            grade: "2".into(),
            age: 7,
            preferred_learning_style: String::new(),
            special_needs_or_accommodations: needs.into(),
            additional_notes: String::new(),
            summary: String::new(),
            user_id: "t1".into(),
        };
        let ctx = PlannerContext {
            teacher_name: "Asha".into(),
            profile: Some(TeacherProfile {
                specializations: vec!["History".into(), "Geography".into()],
                ..TeacherProfile::default()
            }),
            students: vec![
                student("Mira", "Patil", "dyslexia"),
                student("Dev", "Kale", ""),
                student("Ira", "Shah", "peanut allergy"),
                student("Anu", "Rao", "hearing aid"),
            ],
        };

        let tasks = fallback_tasks(&ctx);
        assert_eq!(tasks.len(), 5);
        assert!(tasks[0].title.contains("History"));
        assert!(tasks[1].title.contains("Geography"));
        // Support tasks cap at two students with recorded needs.
        assert!(tasks[3].title.contains("Mira Patil"));
        assert_eq!(tasks[3].kind, "support");
        assert!(tasks[4].title.contains("Ira Shah"));
    }
}
