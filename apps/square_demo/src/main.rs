use std::path::PathBuf;

use anyhow::Result;
use app_api::{App, EventContext};
use clap::Parser;
use server::config::load_settings;
use shared::domain::EventKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SQUARE_TEMPLATE: &str = include_str!("../templates/square.html");

#[derive(Parser, Debug)]
struct Args {
    /// Page template; the bundled square page when omitted.
    #[arg(long)]
    template: Option<PathBuf>,
    #[arg(long, default_value = "Advanced Maths")]
    title: String,
    /// Overrides the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

fn square_input(ctx: &mut EventContext<'_>) -> Result<()> {
    let raw = ctx
        .value("number_input")
        .map(ToString::to_string)
        .unwrap_or_default();
    match raw.trim().parse::<i64>() {
        Ok(n) => match n.checked_mul(n) {
            Some(squared) => ctx.set("result", "innerText", squared),
            None => ctx.set("result", "innerText", "Too big!"),
        },
        Err(_) => ctx.set("result", "innerText", "Not a number!"),
    }
}

fn build_app(args: &Args) -> Result<App> {
    let mut app = match &args.template {
        Some(path) => App::from_template_file(args.title.clone(), path)?,
        None => App::new(args.title.clone(), SQUARE_TEMPLATE)?,
    };
    app.on("number_input", EventKind::Input, square_input)?;
    Ok(app)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(bind) = &args.bind {
        settings.server_bind = bind.clone();
    }
    settings.title = args.title.clone();

    let app = build_app(&args)?;
    info!(widgets = app.widgets().count(), "square demo ready");
    server::serve(app, &settings).await
}

#[cfg(test)]
mod tests {
    use shared::{
        domain::ElementId,
        protocol::{EventPayload, PropValue, Props, UpdateInstruction},
    };

    use super::*;

    fn default_args() -> Args {
        Args {
            template: None,
            title: "Advanced Maths".into(),
            bind: None,
        }
    }

    fn input(value: &str) -> EventPayload {
        let mut props = Props::new();
        props.insert("value".into(), PropValue::from(value));
        EventPayload::new(EventKind::Input, ElementId::new("number_input"), &props)
            .expect("payload")
    }

    #[test]
    fn bundled_template_has_the_demo_widgets() {
        let app = build_app(&default_args()).expect("app");
        assert!(app.widget("number_input").is_some());
        assert!(app.widget("result").is_some());
    }

    #[test]
    fn squares_whole_numbers() {
        let mut app = build_app(&default_args()).expect("app");
        let updates = app.handle_event(&input(" 9 ")).expect("handled");
        assert_eq!(updates, vec![UpdateInstruction::new("result", "innerText", 81i64)]);
    }

    #[test]
    fn rejects_non_numbers_and_overflow() {
        let mut app = build_app(&default_args()).expect("app");
        let updates = app.handle_event(&input("nine")).expect("handled");
        assert_eq!(updates[0].value, PropValue::from("Not a number!"));

        let updates = app
            .handle_event(&input(&i64::MAX.to_string()))
            .expect("handled");
        assert_eq!(updates[0].value, PropValue::from("Too big!"));
    }
}
