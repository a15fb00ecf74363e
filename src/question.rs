use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chatgpt::prelude::ChatGPT;

use crate::session::{Category, Letter, QuestionSlot};

/// Raw text producer behind the adapter. The real implementation talks to
/// the OpenAI chat API; tests substitute canned strings.
pub trait QuestionSource: Send + Sync + 'static {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String, SourceError>> + Send;
}

#[derive(Debug)]
pub enum SourceError {
    Backend(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Backend(e) => write!(f, "question source failed: {e}"),
        }
    }
}

impl Error for SourceError {}

/// Supplies one well-formed question per call. Infallible by contract: any
/// trouble downstream is absorbed into the fallback question.
pub trait QuestionProvider: Send + Sync + 'static {
    fn fetch(&self, category: Category) -> impl Future<Output = QuestionSlot> + Send;
}

/// The question every student gets when generation misbehaves.
pub fn fallback_question() -> QuestionSlot {
    QuestionSlot::new(
        "Qual é o resultado de 2 + 2?",
        [
            "A) 3".to_string(),
            "B) 4".to_string(),
            "C) 5".to_string(),
            "D) 6".to_string(),
        ],
        Letter::B,
    )
}

fn build_prompt(category: Category) -> String {
    format!(
        "Crie uma questão de múltipla escolha sobre {} para ensino fundamental.\n\
         Formato exigido SEM MARKDOWN:\n\
         Enunciado da questão\n\
         A) Alternativa A\n\
         B) Alternativa B\n\
         C) Alternativa C\n\
         D) Alternativa D\n\
         Resposta correta: [APENAS A LETRA, ex: A]",
        category.label()
    )
}

#[derive(Debug, PartialEq, Eq)]
enum ParseError {
    EmptyBody,
    MissingOption(Letter),
    StrayLine,
    MissingAnswer,
    BadAnswerLetter,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::EmptyBody => write!(f, "no question body before the options"),
            ParseError::MissingOption(l) => write!(f, "option {l}) missing or out of order"),
            ParseError::StrayLine => write!(f, "unexpected line after the options"),
            ParseError::MissingAnswer => write!(f, "no correct-answer line"),
            ParseError::BadAnswerLetter => write!(f, "correct-answer letter is not A-D"),
        }
    }
}

fn answer_token(line: &str) -> Option<&str> {
    for prefix in ["resposta correta:", "resposta:", "answer:"] {
        // slicing is safe only when the prefix ends on a char boundary
        if line.is_char_boundary(prefix.len())
            && line[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return Some(line[prefix.len()..].trim());
        }
    }
    None
}

/// Decomposes generated text into body, four `X)` option lines in order and
/// the announced correct letter. Everything the layout does not allow is an
/// error, so the engine only ever sees well-formed slots.
fn parse_generated(raw: &str) -> Result<QuestionSlot, ParseError> {
    let mut body = String::new();
    let mut options: Vec<String> = Vec::with_capacity(4);
    let mut correct: Option<Letter> = None;

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(token) = answer_token(line) {
            let letter = token
                .chars()
                .find(|c| c.is_alphanumeric())
                .ok_or(ParseError::MissingAnswer)?;
            correct = Some(Letter::from_char(letter).ok_or(ParseError::BadAnswerLetter)?);
            continue;
        }

        if options.len() < 4 {
            let expected = Letter::ALL[options.len()];
            if line.starts_with(&format!("{expected})")) {
                options.push(line.to_string());
                continue;
            }
            // an option line for the wrong letter means the expected one
            // was skipped or the options came out of order
            if Letter::ALL.iter().any(|l| line.starts_with(&format!("{l})"))) {
                return Err(ParseError::MissingOption(expected));
            }
        }

        if options.is_empty() && correct.is_none() {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
        } else {
            return Err(ParseError::StrayLine);
        }
    }

    if body.is_empty() {
        return Err(ParseError::EmptyBody);
    }
    if options.len() < 4 {
        return Err(ParseError::MissingOption(Letter::ALL[options.len()]));
    }
    let correct = correct.ok_or(ParseError::MissingAnswer)?;

    let options: [String; 4] = options.try_into().expect("exactly four options");
    Ok(QuestionSlot::new(body, options, correct))
}

/// Question Provider Adapter: prompts the source, enforces a per-question
/// deadline and validates the layout. Never returns an error past this
/// boundary; a malformed or late generation becomes the fallback question.
pub struct GeneratedQuestions<S> {
    source: S,
    budget: Duration,
}

impl<S: QuestionSource> GeneratedQuestions<S> {
    pub fn new(source: S, budget: Duration) -> Self {
        Self { source, budget }
    }
}

impl<S: QuestionSource> QuestionProvider for GeneratedQuestions<S> {
    async fn fetch(&self, category: Category) -> QuestionSlot {
        let prompt = build_prompt(category);
        let raw = match tokio::time::timeout(self.budget, self.source.generate(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                log::warn!("question generation for '{}' failed: {e}", category.tag());
                return fallback_question();
            }
            Err(_) => {
                log::warn!(
                    "question generation for '{}' exceeded {:?}",
                    category.tag(),
                    self.budget
                );
                return fallback_question();
            }
        };

        match parse_generated(&raw) {
            Ok(slot) => slot,
            Err(e) => {
                log::warn!("malformed generated question for '{}': {e}", category.tag());
                fallback_question()
            }
        }
    }
}

/// OpenAI-backed source.
pub struct ChatGptSource {
    client: ChatGPT,
}

impl ChatGptSource {
    pub fn new(api_key: &str) -> Result<Self, chatgpt::err::Error> {
        Ok(Self {
            client: ChatGPT::new(api_key)?,
        })
    }
}

impl QuestionSource for ChatGptSource {
    async fn generate(&self, prompt: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .send_message(prompt)
            .await
            .map_err(|e| SourceError::Backend(Box::new(e)))?;
        Ok(response.message().content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedSource(Result<&'static str, ()>);

    impl QuestionSource for CannedSource {
        async fn generate(&self, _prompt: &str) -> Result<String, SourceError> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(()) => Err(SourceError::Backend("boom".into())),
            }
        }
    }

    struct StalledSource;

    impl QuestionSource for StalledSource {
        async fn generate(&self, _prompt: &str) -> Result<String, SourceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("the provider deadline fires first")
        }
    }

    const WELL_FORMED: &str = "Quanto é 3 x 4?\n\
        A) 7\n\
        B) 12\n\
        C) 14\n\
        D) 34\n\
        Resposta correta: B";

    #[test]
    fn parses_canonical_layout() {
        let slot = parse_generated(WELL_FORMED).unwrap();
        assert_eq!(slot.body(), "Quanto é 3 x 4?");
        assert_eq!(slot.options()[2], "C) 14");
        assert_eq!(slot.correct_letter(), Letter::B);
    }

    #[test]
    fn parses_multiline_body_and_blank_lines() {
        let raw = "Maria tem 3 maçãs.\nJoão tem 4 maçãs.\nQuantas ao todo?\n\n\
            A) 5\nB) 6\nC) 7\nD) 8\n\nResposta: C";
        let slot = parse_generated(raw).unwrap();
        assert!(slot.body().contains("João"));
        assert_eq!(slot.correct_letter(), Letter::C);
    }

    #[test]
    fn rejects_missing_option() {
        let raw = "Quanto é 3 x 4?\nA) 7\nB) 12\nD) 34\nResposta correta: B";
        assert_eq!(
            parse_generated(raw).unwrap_err(),
            ParseError::MissingOption(Letter::C)
        );
    }

    #[test]
    fn rejects_out_of_order_options() {
        let raw = "Quanto é 3 x 4?\nB) 12\nA) 7\nC) 14\nD) 34\nResposta correta: B";
        assert_eq!(
            parse_generated(raw).unwrap_err(),
            ParseError::MissingOption(Letter::A)
        );
    }

    #[test]
    fn tolerates_multibyte_text_near_the_answer_prefix() {
        // "ſ" is two bytes; a naive lowercase-then-slice would panic here
        let raw = "Quanto é 3 x 4?\nA) 7\nB) 12\nC) 14\nD) 34\nReſposta correta: B";
        assert_eq!(parse_generated(raw).unwrap_err(), ParseError::StrayLine);
    }

    #[test]
    fn rejects_unknown_answer_letter() {
        let raw = "Quanto é 3 x 4?\nA) 7\nB) 12\nC) 14\nD) 34\nResposta correta: E";
        assert_eq!(parse_generated(raw).unwrap_err(), ParseError::BadAnswerLetter);
    }

    #[test]
    fn rejects_missing_answer_line() {
        let raw = "Quanto é 3 x 4?\nA) 7\nB) 12\nC) 14\nD) 34";
        assert_eq!(parse_generated(raw).unwrap_err(), ParseError::MissingAnswer);
    }

    #[test]
    fn accepts_bracketed_answer_token() {
        let raw = format!("{}\n", WELL_FORMED.replace("Resposta correta: B", "Resposta correta: [B]"));
        assert_eq!(parse_generated(&raw).unwrap().correct_letter(), Letter::B);
    }

    #[tokio::test]
    async fn malformed_generation_falls_back() {
        let provider = GeneratedQuestions::new(
            CannedSource(Ok("isso não é uma questão")),
            Duration::from_secs(15),
        );
        let slot = provider.fetch(Category::Fracoes).await;
        assert_eq!(slot.body(), "Qual é o resultado de 2 + 2?");
        assert_eq!(slot.options()[1], "B) 4");
        assert_eq!(slot.correct_letter(), Letter::B);
    }

    #[tokio::test]
    async fn source_error_falls_back() {
        let provider = GeneratedQuestions::new(CannedSource(Err(())), Duration::from_secs(15));
        let slot = provider.fetch(Category::Porcentagem).await;
        assert_eq!(slot.correct_letter(), Letter::B);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_falls_back_after_budget() {
        let provider = GeneratedQuestions::new(StalledSource, Duration::from_secs(15));
        let slot = provider.fetch(Category::Equacoes).await;
        assert_eq!(slot.body(), "Qual é o resultado de 2 + 2?");
    }

    #[tokio::test]
    async fn well_formed_generation_passes_through() {
        let provider =
            GeneratedQuestions::new(CannedSource(Ok(WELL_FORMED)), Duration::from_secs(15));
        let slot = provider.fetch(Category::OperacoesBasicas).await;
        assert_eq!(slot.body(), "Quanto é 3 x 4?");
    }
}
