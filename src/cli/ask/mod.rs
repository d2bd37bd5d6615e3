//! Ask command - runs a single request without the HTTP server

use clap::Args;

use crate::domain::workflow::{RequestFields, WorkflowFamily};

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The natural-language question
    #[arg(short, long)]
    pub question: String,

    #[arg(long)]
    pub user_id: String,

    #[arg(long)]
    pub company_id: String,

    /// Pipeline to run instead of supervisor routing (table_sql, tool_use, ...)
    #[arg(long, value_parser = parse_family)]
    pub family: Option<WorkflowFamily>,
}

fn parse_family(value: &str) -> Result<WorkflowFamily, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown workflow family '{}'", value))
}

/// Run the request and print the outcome
pub async fn run(args: AskArgs) -> anyhow::Result<()> {
    let config = super::bootstrap();
    let orchestrator = crate::build_orchestrator(&config, None).await?;

    let request = RequestFields::new(args.question, args.user_id, args.company_id);
    let outcome = orchestrator.start(request, args.family).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    #[test]
    fn test_parse_ask_args() {
        let cli = Cli::parse_from([
            "nlq-orchestrator",
            "ask",
            "--question",
            "How much did we spend in May?",
            "--user-id",
            "user-1",
            "--company-id",
            "company-1",
            "--family",
            "table_sql",
        ]);

        match cli.command {
            Command::Ask(args) => {
                assert_eq!(args.company_id, "company-1");
                assert_eq!(args.family, Some(WorkflowFamily::TableSql));
            }
            Command::Serve => panic!("expected ask"),
        }
    }

    #[test]
    fn test_unknown_family_rejected() {
        assert!(parse_family("graph").is_err());
        assert_eq!(parse_family("tool_use"), Ok(WorkflowFamily::ToolUse));
    }
}
