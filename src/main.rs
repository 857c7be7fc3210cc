//! agent-thread CLI binary entry point.

use futures::StreamExt;

use agent_thread::cli::{ChecklistArgs, Cli, Commands, RunArgs, SettingsArgs};
use agent_thread::config::AgentSettings;
use agent_thread::thread::{
    AgentClient, TabContext, ThreadEvent, ThreadItemDetails, ThreadOptions, TurnOptions,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AGENT_THREAD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::Checklist(args) => handle_checklist(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_settings(args: &SettingsArgs) -> Result<AgentSettings, Box<dyn std::error::Error>> {
    let mut settings = AgentSettings::load()?;
    if let Some(model) = &args.model {
        settings.task_model = model.clone();
    }
    if let Some(flavor) = args.flavor {
        settings.api_flavor = flavor;
    }
    if let Some(max_tokens) = args.max_tokens {
        settings.max_tokens = max_tokens;
    }
    settings.require_api_key()?;
    Ok(settings)
}

fn thread_options(args: &SettingsArgs) -> ThreadOptions {
    ThreadOptions {
        system_prompt: args.system.clone(),
        ..Default::default()
    }
}

async fn handle_run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let client = AgentClient::new(load_settings(&args.settings)?);

    let mut options = thread_options(&args.settings);
    if args.tab_url.is_some() || args.tab_title.is_some() {
        options.tab = Some(TabContext {
            url: args.tab_url.clone(),
            title: args.tab_title.clone(),
            active: Some(true),
            ..Default::default()
        });
    }

    let thread = match args.thread {
        Some(id) => client.resume_thread(id, options),
        None => client.start_thread(options),
    };

    let mut streamed = thread.run_streamed(args.prompt, TurnOptions::default());
    let mut final_response = None;
    while let Some(event) = streamed.events.next().await {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match &event {
            ThreadEvent::ItemCompleted(completed) => {
                if let ThreadItemDetails::AgentMessage(message) = &completed.item.details {
                    final_response = Some(message.text.clone());
                }
            }
            ThreadEvent::TurnFailed(failed) => eprintln!("turn failed: {}", failed.error.message),
            _ => {}
        }
    }

    let outcome = streamed.completion.wait().await?;
    if !args.json {
        if let Some(text) = final_response {
            println!("{text}");
        }
        for action in &outcome.actions {
            eprintln!("  {} {}", action.action_type, action.id);
        }
        if let Some(id) = thread.id() {
            eprintln!("thread: {id}");
        }
    }

    if outcome.is_failed() {
        std::process::exit(2);
    }
    Ok(())
}

async fn handle_checklist(args: ChecklistArgs) -> Result<(), Box<dyn std::error::Error>> {
    let client = AgentClient::new(load_settings(&args.settings)?);
    let items = client
        .generate_checklist(&args.prompt, &thread_options(&args.settings))
        .await;
    if items.is_empty() {
        return Err("no checklist could be generated".into());
    }
    for (index, item) in items.iter().enumerate() {
        println!("{}. {item}", index + 1);
    }
    Ok(())
}
