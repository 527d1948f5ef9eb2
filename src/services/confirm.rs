//! 发布前的交互确认
//!
//! 生产环境必须输入完整的 `yes`，预发环境输入 `y` 即可

use tracing::{info, warn};

use crate::domain::deploy::Environment;
use crate::infra::prompt::Prompter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Aborted,
}

pub struct ConfirmationGate<'a> {
    prompter: &'a dyn Prompter,
}

impl<'a> ConfirmationGate<'a> {
    pub fn new(prompter: &'a dyn Prompter) -> Self {
        Self { prompter }
    }

    pub async fn confirm(&self, environment: Environment) -> Confirmation {
        let question = match environment {
            Environment::Production => {
                "You are about to deploy to PRODUCTION. Type 'yes' to continue:"
            }
            Environment::Staging => "Deploy to staging? [y/N]:",
        };

        let answer = self.prompter.ask(question).await;
        let decision = evaluate(environment, &answer);
        match decision {
            Confirmation::Confirmed => info!(environment = %environment, "Release confirmed"),
            Confirmation::Aborted => warn!(environment = %environment, "Release aborted by user"),
        }
        decision
    }

    /// 普通的 `y/n` 提问，用于覆盖确认
    pub async fn ask_yes_no(&self, question: &str) -> bool {
        let answer = self.prompter.ask(question).await;
        matches!(answer.trim(), "y" | "Y")
    }
}

/// 按环境规则判定原始输入
pub fn evaluate(environment: Environment, answer: &str) -> Confirmation {
    let answer = answer.trim();
    let accepted = match environment {
        Environment::Production => answer.eq_ignore_ascii_case("yes"),
        Environment::Staging => answer == "y" || answer == "Y",
    };
    if accepted {
        Confirmation::Confirmed
    } else {
        Confirmation::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::prompt::testing::ScriptedPrompter;

    #[test]
    fn test_production_requires_full_word() {
        for answer in ["yes", "YES", "Yes", "  yes \n"] {
            assert_eq!(evaluate(Environment::Production, answer), Confirmation::Confirmed, "{answer:?}");
        }
        for answer in ["Y", "y", "yes please", "", "no", "yess"] {
            assert_eq!(evaluate(Environment::Production, answer), Confirmation::Aborted, "{answer:?}");
        }
    }

    #[test]
    fn test_staging_single_letter() {
        assert_eq!(evaluate(Environment::Staging, "y"), Confirmation::Confirmed);
        assert_eq!(evaluate(Environment::Staging, " Y "), Confirmation::Confirmed);
        assert_eq!(evaluate(Environment::Staging, "yes"), Confirmation::Aborted);
        assert_eq!(evaluate(Environment::Staging, ""), Confirmation::Aborted);
        assert_eq!(evaluate(Environment::Staging, "n"), Confirmation::Aborted);
    }

    #[tokio::test]
    async fn test_gate_reads_through_prompter() {
        let prompter = ScriptedPrompter::new(&["YES"]);
        let gate = ConfirmationGate::new(&prompter);

        assert_eq!(gate.confirm(Environment::Production).await, Confirmation::Confirmed);
        assert!(prompter.questions()[0].contains("PRODUCTION"));
    }

    #[tokio::test]
    async fn test_eof_aborts() {
        let prompter = ScriptedPrompter::new(&[]);
        let gate = ConfirmationGate::new(&prompter);
        assert_eq!(gate.confirm(Environment::Staging).await, Confirmation::Aborted);
        assert!(!gate.ask_yes_no("Continue anyway? [y/N]:").await);
    }
}
