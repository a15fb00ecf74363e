use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

/// Number of questions in a placement test.
pub const QUESTION_COUNT: usize = 5;

/// Telegram chat id of the private chat with the student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Question domains of the placement test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    OperacoesBasicas,
    NumerosInteiros,
    Fracoes,
    Porcentagem,
    Equacoes,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::OperacoesBasicas,
        Category::NumerosInteiros,
        Category::Fracoes,
        Category::Porcentagem,
        Category::Equacoes,
    ];

    /// Stable ASCII tag used in callback data and in the database.
    pub fn tag(&self) -> &'static str {
        match self {
            Category::OperacoesBasicas => "operacoes_basicas",
            Category::NumerosInteiros => "numeros_inteiros",
            Category::Fracoes => "fracoes",
            Category::Porcentagem => "porcentagem",
            Category::Equacoes => "equacoes",
        }
    }

    /// Human label, used on buttons and in generation prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Category::OperacoesBasicas => "operações básicas",
            Category::NumerosInteiros => "números inteiros",
            Category::Fracoes => "frações",
            Category::Porcentagem => "porcentagem",
            Category::Equacoes => "equações",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Category> {
        Category::ALL.iter().copied().find(|c| c.tag() == tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Letter {
    A,
    B,
    C,
    D,
}

impl Letter {
    pub const ALL: [Letter; 4] = [Letter::A, Letter::B, Letter::C, Letter::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            Letter::A => "A",
            Letter::B => "B",
            Letter::C => "C",
            Letter::D => "D",
        }
    }

    pub fn from_char(c: char) -> Option<Letter> {
        match c.to_ascii_uppercase() {
            'A' => Some(Letter::A),
            'B' => Some(Letter::B),
            'C' => Some(Letter::C),
            'D' => Some(Letter::D),
            _ => None,
        }
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one question slot. Transitions exactly once away
/// from `Unresolved` and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Unresolved,
    AnsweredCorrect,
    AnsweredWrong,
    TimedOut,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Unresolved => "pendente",
            Resolution::AnsweredCorrect => "correta",
            Resolution::AnsweredWrong => "incorreta",
            Resolution::TimedOut => "tempo_esgotado",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuestionSlot {
    body: String,
    options: [String; 4],
    correct_letter: Letter,
    resolution: Resolution,
    submitted: Option<Letter>,
}

impl QuestionSlot {
    pub fn new(body: impl Into<String>, options: [String; 4], correct_letter: Letter) -> Self {
        Self {
            body: body.into(),
            options,
            correct_letter,
            resolution: Resolution::Unresolved,
            submitted: None,
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn options(&self) -> &[String; 4] {
        &self.options
    }

    pub fn correct_letter(&self) -> Letter {
        self.correct_letter
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn submitted(&self) -> Option<Letter> {
        self.submitted
    }
}

/// One user's in-progress placement test.
#[derive(Debug)]
pub struct Session {
    user_id: UserId,
    category: Category,
    questions: Vec<QuestionSlot>,
    cursor: usize,
    started_at: Instant,
    store_attempts: u32,
}

impl Session {
    pub fn new(user_id: UserId, category: Category, questions: Vec<QuestionSlot>) -> Self {
        debug_assert_eq!(questions.len(), QUESTION_COUNT);
        Self {
            user_id,
            category,
            questions,
            cursor: 0,
            started_at: Instant::now(),
            store_attempts: 0,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn questions(&self) -> &[QuestionSlot] {
        &self.questions
    }

    /// Index of the first unresolved slot; `QUESTION_COUNT` once done.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&QuestionSlot> {
        self.questions.get(self.cursor)
    }

    /// Resolves the slot under the cursor and advances it. The cursor only
    /// ever moves forward, which is what makes stale answers and stale
    /// timeouts harmless.
    pub fn resolve_current(&mut self, resolution: Resolution, submitted: Option<Letter>) {
        debug_assert_ne!(resolution, Resolution::Unresolved);
        let slot = &mut self.questions[self.cursor];
        debug_assert_eq!(slot.resolution, Resolution::Unresolved);
        slot.resolution = resolution;
        slot.submitted = submitted;
        self.cursor += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == QUESTION_COUNT
    }

    pub fn score(&self) -> u8 {
        self.questions
            .iter()
            .filter(|q| q.resolution == Resolution::AnsweredCorrect)
            .count() as u8
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn store_attempts(&self) -> u32 {
        self.store_attempts
    }

    pub fn record_store_attempt(&mut self) {
        self.store_attempts += 1;
    }
}

/// Live sessions, one at most per user. The outer lock is held only for map
/// entry operations; each session carries its own lock so that answer and
/// timeout events for one user never interleave, while different users never
/// contend.
#[derive(Debug, Default)]
pub struct SessionMap {
    inner: Mutex<HashMap<UserId, Arc<Mutex<Session>>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user: UserId) -> Option<Arc<Mutex<Session>>> {
        self.inner.lock().await.get(&user).map(Arc::clone)
    }

    pub async fn contains(&self, user: UserId) -> bool {
        self.inner.lock().await.contains_key(&user)
    }

    /// Inserts a fresh session unless one is already live for this user.
    pub async fn insert_if_absent(
        &self,
        user: UserId,
        session: Session,
    ) -> Result<Arc<Mutex<Session>>, ()> {
        let mut map = self.inner.lock().await;
        if map.contains_key(&user) {
            return Err(());
        }
        let entry = Arc::new(Mutex::new(session));
        map.insert(user, Arc::clone(&entry));
        Ok(entry)
    }

    pub async fn remove(&self, user: UserId) -> Option<Arc<Mutex<Session>>> {
        self.inner.lock().await.remove(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(correct: Letter) -> QuestionSlot {
        QuestionSlot::new(
            "Quanto é 1 + 1?",
            [
                "A) 1".to_string(),
                "B) 2".to_string(),
                "C) 3".to_string(),
                "D) 4".to_string(),
            ],
            correct,
        )
    }

    fn session() -> Session {
        Session::new(
            UserId(7),
            Category::Equacoes,
            (0..QUESTION_COUNT).map(|_| slot(Letter::B)).collect(),
        )
    }

    #[test]
    fn cursor_advances_once_per_resolution() {
        let mut s = session();
        assert_eq!(s.cursor(), 0);
        s.resolve_current(Resolution::AnsweredCorrect, Some(Letter::B));
        assert_eq!(s.cursor(), 1);
        s.resolve_current(Resolution::TimedOut, None);
        assert_eq!(s.cursor(), 2);
        assert!(!s.is_complete());
    }

    #[test]
    fn score_counts_only_correct_answers() {
        let mut s = session();
        s.resolve_current(Resolution::AnsweredCorrect, Some(Letter::B));
        s.resolve_current(Resolution::AnsweredWrong, Some(Letter::A));
        s.resolve_current(Resolution::TimedOut, None);
        s.resolve_current(Resolution::AnsweredCorrect, Some(Letter::B));
        s.resolve_current(Resolution::AnsweredWrong, Some(Letter::C));
        assert!(s.is_complete());
        assert_eq!(s.score(), 2);
    }

    #[tokio::test]
    async fn map_rejects_second_session_for_same_user() {
        let map = SessionMap::new();
        assert!(map.insert_if_absent(UserId(7), session()).await.is_ok());
        assert!(map.insert_if_absent(UserId(7), session()).await.is_err());
        assert!(map.insert_if_absent(UserId(8), session()).await.is_ok());
        map.remove(UserId(7)).await;
        assert!(map.insert_if_absent(UserId(7), session()).await.is_ok());
    }

    #[test]
    fn category_tags_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::from_tag(c.tag()), Some(c));
        }
        assert_eq!(Category::from_tag("algebra_linear"), None);
    }
}
