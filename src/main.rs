use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use log::{error, info, warn, LevelFilter};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{env, io};
use tui_input::backend::crossterm::EventHandler;
use tui_input::Input;

mod ui;
mod utils;

use payphone::api::{HttpTransport, TransportClient, TransportError};
use payphone::chat::{ChatEngine, SendError};
use payphone::session::{self, Session};
use ui::{ChatUI, Focus, NewChatDialog};

/// How often the conversation list is re-fetched in the background.
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Command line arguments for PayPhone
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "PayPhone: a terminal chat client.",
    long_about = "PayPhone is a terminal client for one-to-one chats with \
    delivery progress, pinned conversations and search.\n\n\
    Credentials can be supplied via the PAYPHONE_SERVER, PAYPHONE_IDENTIFIER \
    and PAYPHONE_PASSWORD environment variables."
)]
struct Args {
    /// Server URL, e.g. https://chat.example.com
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Override the directory for the session file and log file
    #[arg(long, value_name = "PATH")]
    config_dir: Option<PathBuf>,

    /// Ignore any saved session and prompt for credentials
    #[arg(long)]
    fresh_login: bool,
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9]{6,15}$").expect("phone regex"));

/// Logins are accepted by email address or phone number.
fn valid_identifier(identifier: &str) -> bool {
    EMAIL_RE.is_match(identifier) || PHONE_RE.is_match(identifier)
}

/// Prompts the user for login details or uses environment variables
fn prompt_credentials(default_server: Option<String>) -> Result<(String, String, String)> {
    let server = match env::var("PAYPHONE_SERVER").ok().or(default_server) {
        Some(server) => server,
        None => {
            eprintln!("Enter server URL (e.g. https://chat.example.com):");
            utils::read_line()?
        }
    };

    let identifier = match env::var("PAYPHONE_IDENTIFIER") {
        Ok(identifier) => identifier,
        Err(_) => loop {
            eprintln!("Enter email address or phone number:");
            let entered = utils::read_line()?;
            if valid_identifier(&entered) {
                break entered;
            }
            eprintln!("That does not look like an email address or phone number.");
        },
    };

    let password = match env::var("PAYPHONE_PASSWORD") {
        Ok(password) => password,
        Err(_) => {
            eprintln!("Enter password:");
            utils::read_line()?
        }
    };

    Ok((server, identifier, password))
}

/// Restore the saved session if it is usable, otherwise log in and save.
async fn establish_session(args: &Args) -> Result<Session> {
    if !args.fresh_login {
        if let Some(saved) = session::load_session()? {
            let matches_server = args
                .server
                .as_deref()
                .map(|s| s.trim_end_matches('/') == saved.server.trim_end_matches('/'))
                .unwrap_or(true);
            if matches_server {
                info!("Using saved session for {}", saved.display_name);
                return Ok(saved);
            }
            info!("Saved session is for {}, logging in again", saved.server);
        }
    }

    let (server, identifier, password) = prompt_credentials(args.server.clone())?;
    println!("Connecting to {}... please wait...", server);

    let auth = HttpTransport::login(&server, &identifier, &password).await?;
    let session = Session::new(&server, &auth.user.id, &auth.user.name, &auth.token);
    if let Err(e) = session::save_session(&session) {
        eprintln!("Warning: failed to save session: {}", e);
    }
    Ok(session)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.config_dir {
        session::set_config_dir_override(dir.clone());
    }

    let log_file_path = session::get_config_dir()
        .map(|dir| dir.join("payphone.log"))
        .unwrap_or_else(|_| PathBuf::from("payphone.log"));
    utils::setup_logging(log_file_path.to_str(), LevelFilter::Debug)?;

    info!("PayPhone client starting up");
    info!("Logging to file: {}", log_file_path.display());

    let session = establish_session(&args).await?;
    let transport = Arc::new(HttpTransport::new(&session.server, &session.token())?);
    let engine_transport: Arc<dyn TransportClient> = transport.clone();
    let (mut engine, mut ticks) = ChatEngine::new(&session.user_id, engine_transport);

    // First conversation fetch happens before the terminal is taken over so
    // a dead token fails loudly instead of into the log file.
    if let Err(e) = engine.refresh_conversations().await {
        if matches!(e, TransportError::Unauthorized) {
            session::clear_session()?;
            eprintln!("Session expired. Run again to log in.");
        }
        return Err(e.into());
    }

    let mut terminal = ui::setup_terminal()?;
    let mut chat_ui = ChatUI::new(&session.user_id);
    sync_ui(&mut chat_ui, &engine);

    let result = run_app(
        &mut terminal,
        &mut chat_ui,
        &mut engine,
        &mut ticks,
        &transport,
    )
    .await;

    ui::restore_terminal(&mut terminal)?;

    if let Err(e) = &result {
        error!("Exiting on error: {}", e);
    }
    result
}

/// Copy fresh engine snapshots into the UI state.
fn sync_ui(chat_ui: &mut ChatUI, engine: &ChatEngine) {
    chat_ui.conversations = engine.filtered_conversations(chat_ui.search.value());
    chat_ui.clamp_selection();
    chat_ui.messages = engine.messages();
    chat_ui.active_conversation = engine.active_conversation().cloned();
    chat_ui.unread_total = engine.unread_total();
    chat_ui.sending = engine.is_send_in_flight();
}

async fn run_app(
    terminal: &mut ui::Terminal<ui::CrosstermBackend<io::Stdout>>,
    chat_ui: &mut ChatUI,
    engine: &mut ChatEngine,
    ticks: &mut tokio::sync::mpsc::UnboundedReceiver<payphone::chat::DeliveryTick>,
    transport: &Arc<HttpTransport>,
) -> Result<()> {
    let mut next_refresh = tokio::time::Instant::now() + REFRESH_INTERVAL;

    loop {
        terminal.draw(|f| chat_ui.draw(f))?;

        // Apply delivery timers that fired since the last pass.
        let mut ticked = false;
        while let Ok(tick) = ticks.try_recv() {
            engine.apply_delivery_tick(tick);
            ticked = true;
        }
        if ticked {
            sync_ui(chat_ui, engine);
        }

        if tokio::time::Instant::now() >= next_refresh {
            if let Err(e) = engine.refresh_conversations().await {
                warn!("Background refresh failed: {}", e);
            }
            sync_ui(chat_ui, engine);
            next_refresh = tokio::time::Instant::now() + REFRESH_INTERVAL;
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        // The new-chat popup swallows all input while open.
        if let Some(dialog) = chat_ui.new_chat.as_mut() {
            match key.code {
                KeyCode::Esc => chat_ui.new_chat = None,
                KeyCode::Down => {
                    if !dialog.users.is_empty() {
                        dialog.selected = (dialog.selected + 1).min(dialog.users.len() - 1);
                    }
                }
                KeyCode::Up => dialog.selected = dialog.selected.saturating_sub(1),
                KeyCode::Enter => {
                    if let Some(user) = dialog.users.get(dialog.selected) {
                        let peer_id = user.id.clone();
                        chat_ui.new_chat = None;
                        match engine.start_conversation(&peer_id).await {
                            Ok(_) => {
                                chat_ui.focus = Focus::Compose;
                                chat_ui.clear_status();
                            }
                            Err(e) => chat_ui.set_status(format!("Could not start chat: {}", e)),
                        }
                        sync_ui(chat_ui, engine);
                    }
                }
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Esc => return Ok(()),
            KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                transport.logout().await;
                session::clear_session()?;
                return Ok(());
            }
            KeyCode::Tab => {
                chat_ui.focus = match chat_ui.focus {
                    Focus::Search => Focus::Conversations,
                    Focus::Conversations => Focus::Compose,
                    Focus::Compose => Focus::Search,
                };
            }
            KeyCode::Char('n') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                match engine.fetch_users().await {
                    Ok(users) => {
                        let users: Vec<_> = users
                            .into_iter()
                            .filter(|u| u.id != engine.current_user_id())
                            .collect();
                        chat_ui.new_chat = Some(NewChatDialog { users, selected: 0 });
                    }
                    Err(e) => chat_ui.set_status(format!("Could not load users: {}", e)),
                }
            }
            KeyCode::Char('p') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                if let Some(conversation) = chat_ui.selected_conversation() {
                    let id = conversation.id.clone();
                    match engine.toggle_pin(&id).await {
                        Ok(pinned) => {
                            info!("Conversation {} pinned: {}", id, pinned);
                            chat_ui.clear_status();
                        }
                        Err(e) => chat_ui.set_status(format!("Could not pin: {}", e)),
                    }
                    sync_ui(chat_ui, engine);
                }
            }
            KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                if let Some(conversation) = chat_ui.selected_conversation() {
                    let id = conversation.id.clone();
                    match engine.delete_conversation(&id).await {
                        Ok(()) => chat_ui.clear_status(),
                        Err(e) => chat_ui.set_status(format!("Could not delete: {}", e)),
                    }
                    sync_ui(chat_ui, engine);
                }
            }
            _ => match chat_ui.focus {
                Focus::Search => {
                    chat_ui.search.handle_event(&Event::Key(key));
                    sync_ui(chat_ui, engine);
                }
                Focus::Conversations => match key.code {
                    KeyCode::Down | KeyCode::Char('j') => chat_ui.select_next(),
                    KeyCode::Up | KeyCode::Char('k') => chat_ui.select_prev(),
                    KeyCode::Enter => {
                        if let Some(conversation) = chat_ui.selected_conversation() {
                            let id = conversation.id.clone();
                            match engine.open_conversation(&id).await {
                                Ok(()) => {
                                    chat_ui.focus = Focus::Compose;
                                    chat_ui.clear_status();
                                }
                                Err(e) => {
                                    chat_ui.set_status(format!("Could not open chat: {}", e))
                                }
                            }
                            sync_ui(chat_ui, engine);
                        }
                    }
                    _ => {}
                },
                Focus::Compose => match key.code {
                    KeyCode::Enter => {
                        let text = chat_ui.compose.value().to_string();
                        match engine.send(&text).await {
                            Ok(_) => {
                                chat_ui.compose = Input::default();
                                chat_ui.clear_status();
                            }
                            Err(SendError::EmptyInput) => {}
                            Err(SendError::AlreadyInFlight) => {
                                chat_ui.set_status("Still sending the previous message...");
                            }
                            Err(SendError::NoActiveConversation) => {
                                chat_ui.set_status("Open a conversation first");
                            }
                            Err(e) => {
                                // Put the typed text back so the user can
                                // retry with Enter.
                                if let Some(text) = e.restorable_text() {
                                    chat_ui.compose = Input::from(text.to_string());
                                }
                                chat_ui.set_status("Failed to send. Press Enter to retry.");
                            }
                        }
                        sync_ui(chat_ui, engine);
                    }
                    _ => {
                        chat_ui.compose.handle_event(&Event::Key(key));
                    }
                },
            },
        }
    }
}
