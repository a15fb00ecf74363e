use uuid::Uuid;

use crate::session::{Category, Letter, Resolution, Session, UserId, QUESTION_COUNT};

/// Proficiency labels from the placement scale, indexed by capped score.
const LEVELS: [&str; 4] = ["iniciante", "básico", "intermediário", "avançado"];

pub fn level_for_score(score: u8) -> &'static str {
    LEVELS[usize::from(score).min(LEVELS.len() - 1)]
}

/// Durable record of one completed placement test: a session row plus one
/// child row per question slot, always exactly five.
#[derive(Debug, Clone)]
pub struct PersistedResult {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub category: Category,
    pub total_time_seconds: u64,
    pub score: u8,
    pub level: &'static str,
    pub answers: Vec<SlotResult>,
}

#[derive(Debug, Clone)]
pub struct SlotResult {
    pub question_number: u8,
    pub resolution: Resolution,
    pub correct_letter: Letter,
    pub submitted_letter: Option<Letter>,
}

/// Pure mapping from a fully-resolved session to its durable record.
pub fn build(session: &Session) -> PersistedResult {
    debug_assert!(session.is_complete());

    let answers = session
        .questions()
        .iter()
        .enumerate()
        .map(|(i, slot)| SlotResult {
            question_number: (i + 1) as u8,
            resolution: slot.resolution(),
            correct_letter: slot.correct_letter(),
            submitted_letter: slot.submitted(),
        })
        .collect();

    let score = session.score();
    PersistedResult {
        session_id: Uuid::new_v4(),
        user_id: session.user_id(),
        category: session.category(),
        total_time_seconds: session.elapsed_seconds(),
        score,
        level: level_for_score(score),
        answers,
    }
}

/// Student-facing summary sent after the last question resolves.
pub fn summary_text(result: &PersistedResult) -> String {
    let minutes = result.total_time_seconds / 60;
    let seconds = result.total_time_seconds % 60;
    format!(
        "🏆 Teste Concluído!\n\n\
         ✅ Acertos: {}/{}\n\
         🎓 Seu nível: {}\n\
         ⏱️ Tempo total: {minutes}min {seconds}s",
        result.score, QUESTION_COUNT, result.level
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::QuestionSlot;

    fn resolved_session(outcomes: [(Resolution, Option<Letter>); QUESTION_COUNT]) -> Session {
        let questions = (0..QUESTION_COUNT)
            .map(|_| {
                QuestionSlot::new(
                    "Quanto é 2 + 3?",
                    [
                        "A) 4".to_string(),
                        "B) 5".to_string(),
                        "C) 6".to_string(),
                        "D) 7".to_string(),
                    ],
                    Letter::B,
                )
            })
            .collect();
        let mut session = Session::new(UserId(42), Category::Porcentagem, questions);
        for (resolution, submitted) in outcomes {
            session.resolve_current(resolution, submitted);
        }
        session
    }

    #[test]
    fn always_emits_five_child_rows() {
        let session = resolved_session([
            (Resolution::TimedOut, None),
            (Resolution::TimedOut, None),
            (Resolution::TimedOut, None),
            (Resolution::TimedOut, None),
            (Resolution::AnsweredCorrect, Some(Letter::B)),
        ]);
        let result = build(&session);
        assert_eq!(result.answers.len(), QUESTION_COUNT);
        assert_eq!(result.score, 1);
        assert_eq!(result.level, "básico");
        assert_eq!(result.answers[0].question_number, 1);
        assert_eq!(result.answers[4].question_number, 5);
        assert!(result.answers[0].submitted_letter.is_none());
    }

    #[test]
    fn level_scale_caps_at_avancado() {
        assert_eq!(level_for_score(0), "iniciante");
        assert_eq!(level_for_score(1), "básico");
        assert_eq!(level_for_score(2), "intermediário");
        assert_eq!(level_for_score(3), "avançado");
        assert_eq!(level_for_score(4), "avançado");
        assert_eq!(level_for_score(5), "avançado");
    }

    #[test]
    fn summary_mentions_score_and_level() {
        let session = resolved_session([
            (Resolution::AnsweredCorrect, Some(Letter::B)),
            (Resolution::AnsweredCorrect, Some(Letter::B)),
            (Resolution::AnsweredWrong, Some(Letter::A)),
            (Resolution::AnsweredCorrect, Some(Letter::B)),
            (Resolution::AnsweredWrong, Some(Letter::D)),
        ]);
        let text = summary_text(&build(&session));
        assert!(text.contains("Acertos: 3/5"));
        assert!(text.contains("avançado"));
    }
}
