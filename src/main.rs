use std::convert::Infallible;
use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use wordcoach::assistant::engine::command_menu;
use wordcoach::assistant::{Assistant, Database, Event, TelegramClient};
use wordcoach::config::Config;
use wordcoach::openai::Client as OpenAiClient;

struct BotState {
    assistant: Arc<Assistant>,
    bot_username: String,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wordcoach.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("wordcoach.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting wordcoach...");
    info!("Loaded config from {config_path}");
    if !config.allowed_user_ids.is_empty() {
        info!("Allowed users: {:?}", config.allowed_user_ids);
    }

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            me.username().to_string()
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            String::new()
        }
    };

    if let Err(e) = bot.set_my_commands(command_menu()).await {
        warn!("Failed to register command menu: {e}");
    }

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let database = match Database::open(&config.database_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to open database {:?}: {}", config.database_path, e);
            std::process::exit(1);
        }
    };

    let assistant = Arc::new(Assistant::new(
        config.assistant_config(),
        database,
        Arc::new(TelegramClient::new(bot.clone())),
        Arc::new(OpenAiClient::new(config.openai_config())),
    ));
    let _sweep = assistant.start_eviction_sweep();
    info!(
        "Cache TTL {}h, sweep every {:?}",
        config.cache_ttl_hours, config.eviction_interval
    );

    let state = Arc::new(BotState { assistant, bot_username });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .distribution_function(|_| None::<Infallible>)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if let Some(event) = Event::from_message(user.id.0 as i64, msg.chat.id.0, text, &state.bot_username) {
        state.assistant.dispatch(event).await;
    }
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!("Failed to answer callback query: {e}");
    }

    let (Some(data), Some(message)) = (q.data.as_ref(), q.message.as_ref()) else {
        return Ok(());
    };

    let event = Event::Callback {
        user_id: q.from.id.0 as i64,
        chat_id: message.chat().id.0,
        message_id: message.id().0 as i64,
        data: data.clone(),
    };
    state.assistant.dispatch(event).await;
    Ok(())
}
