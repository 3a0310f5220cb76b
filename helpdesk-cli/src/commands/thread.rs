use std::{collections::HashSet, fmt::Write as _, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::{Args, Subcommand};
use client::{
    HistoryFilter, MessageThread, TicketApi, TicketDetailScreen, ViewTracker,
    presenter::{self, Side},
};
use shared::{
    config::ClientConfig,
    models::{
        AttachmentUpload, Message, MessageDraft, MessageId, NewTicket, Role, Ticket, TicketId,
        TicketStatus, Viewer,
    },
};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    signal,
};
use tracing::warn;

use super::{describe_state, next_state, session::SessionContext};

#[derive(Subcommand, Debug)]
pub enum TicketCommand {
    /// Show a ticket's messages grouped by day, optionally following the thread live
    Show(ShowArgs),
    /// Post a message to a ticket
    Send(SendArgs),
    /// Open a new ticket
    Create(CreateArgs),
    /// Change a ticket's status
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Ticket identifier
    pub ticket: TicketId,

    #[arg(long, help = "Only messages whose text contains this")]
    pub message_query: Option<String>,

    #[arg(long, help = "Only messages with an attachment whose name contains this")]
    pub attachment_query: Option<String>,

    #[arg(
        long,
        short,
        help = "Stay on the thread: print pushed messages and send each line typed on stdin"
    )]
    pub follow: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Ticket identifier
    pub ticket: TicketId,

    /// Message text; may be empty when files are attached
    #[arg(default_value = "")]
    pub message: String,

    #[arg(long = "file", short, help = "Attach a file (repeatable)")]
    pub files: Vec<PathBuf>,

    #[arg(long, help = "Mirror the reply to the external chat channel (administrators only)")]
    pub share: bool,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[arg(long, help = "One-line summary of the request")]
    pub header: String,

    /// First message of the ticket
    pub message: String,

    #[arg(long = "file", short, help = "Attach a file (repeatable)")]
    pub files: Vec<PathBuf>,

    #[arg(long, help = "Mirror the ticket to the external chat channel (administrators only)")]
    pub share: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Ticket identifier
    pub ticket: TicketId,

    /// New status (pending, active, completed, urgent)
    pub status: TicketStatus,
}

pub async fn run(config: &ClientConfig, command: TicketCommand) -> Result<()> {
    let session = SessionContext::restore(config)?;
    let outcome = match command {
        TicketCommand::Show(args) if args.follow => follow(config, &session, args).await,
        TicketCommand::Show(args) => show(&session, args).await,
        TicketCommand::Send(args) => send(&session, args).await,
        TicketCommand::Create(args) => create(&session, args).await,
        TicketCommand::Status(args) => set_status(&session, args).await,
    };
    session.persist();
    outcome
}

fn history_filter(args: &ShowArgs) -> HistoryFilter {
    HistoryFilter {
        message_query: args.message_query.clone(),
        attachment_query: args.attachment_query.clone(),
    }
}

async fn show(session: &SessionContext, args: ShowArgs) -> Result<()> {
    let api = session.api();
    let ticket = api
        .get_ticket(args.ticket)
        .await
        .with_context(|| format!("failed to fetch ticket #{}", args.ticket))?;
    let mut thread = MessageThread::new(args.ticket);
    thread.set_ticket(ticket);
    thread
        .load_history(api.as_ref(), &history_filter(&args))
        .await
        .context("failed to fetch messages")?;

    let mut tracker = ViewTracker::new(Arc::clone(&api));
    if let Some(receipt) = tracker.mark_viewed(args.ticket, thread.len()) {
        if let Err(err) = receipt.await {
            warn!(ticket_id = args.ticket, error = %err, "read receipt task failed");
        }
    }

    print!("{}", render_thread(&session.viewer(), &thread, Local::now()));
    Ok(())
}

async fn follow(config: &ClientConfig, session: &SessionContext, args: ShowArgs) -> Result<()> {
    let viewer = session.viewer();
    let mut screen = TicketDetailScreen::open(
        session.api(),
        session.connector(config),
        viewer,
        args.ticket,
        config.reconnect_delay(),
    );
    if let Err(err) = screen.load(&history_filter(&args)).await {
        screen.close().await;
        return Err(err).with_context(|| format!("failed to load ticket #{}", args.ticket));
    }
    print!("{}", render_thread(&viewer, screen.thread(), Local::now()));
    println!("Following ticket #{}... type a line to reply, Ctrl+C to stop", args.ticket);

    let mut printed: HashSet<MessageId> = screen
        .thread()
        .messages()
        .iter()
        .map(|message| message.id)
        .collect();
    let mut input = Some(BufReader::new(tokio::io::stdin()).lines());
    let mut connection = screen.connection();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            state = next_state(&mut connection) => eprintln!("[push] {}", describe_state(state)),
            line = next_line(&mut input) => {
                let draft = MessageDraft::text(line);
                if draft.is_empty() {
                    continue;
                }
                if let Err(err) = screen.send(&draft).await {
                    eprintln!("error: message not sent: {err}");
                }
            }
            event = screen.next_event() => {
                let Some(event) = event else { break };
                screen.apply(event);
                screen.drain();
            }
        }
        print_new(&viewer, screen.thread(), &mut printed);
    }

    screen.settle_receipts().await;
    screen.close().await;
    Ok(())
}

/// Next stdin line. Pends forever after end of input so following continues.
async fn next_line(input: &mut Option<Lines<BufReader<Stdin>>>) -> String {
    if let Some(lines) = input.as_mut() {
        match lines.next_line().await {
            Ok(Some(line)) => return line,
            Ok(None) => {}
            Err(err) => eprintln!("warning: stopped reading stdin: {err}"),
        }
        *input = None;
    }
    std::future::pending().await
}

fn print_new(viewer: &Viewer, thread: &MessageThread, printed: &mut HashSet<MessageId>) {
    let now = Local::now();
    for message in thread.ordered() {
        if printed.insert(message.id) {
            println!("{}", render_message(viewer, thread.ticket(), message, now));
        }
    }
}

async fn send(session: &SessionContext, args: SendArgs) -> Result<()> {
    ensure_can_share(&session.viewer(), args.share)?;
    let draft = MessageDraft {
        body: args.message,
        attachments: read_attachments(&args.files).await?,
        share: args.share,
    };
    if draft.is_empty() {
        bail!("nothing to send; pass a message or at least one --file");
    }

    let mut thread = MessageThread::new(args.ticket);
    let message = thread
        .send(&session.client, &draft)
        .await
        .with_context(|| format!("failed to send message to ticket #{}", args.ticket))?;
    println!("Sent message #{} to ticket #{}", message.id, args.ticket);
    Ok(())
}

async fn create(session: &SessionContext, args: CreateArgs) -> Result<()> {
    ensure_can_share(&session.viewer(), args.share)?;
    if args.header.trim().is_empty() || args.message.trim().is_empty() {
        bail!("a ticket needs both a header and a first message");
    }
    let ticket = NewTicket {
        header: args.header.trim().to_string(),
        message: args.message,
        share: args.share,
        files: read_attachments(&args.files).await?,
    };

    let created = session
        .api()
        .create_ticket(&ticket)
        .await
        .context("failed to create ticket")?;
    println!(
        "Created ticket #{}: {} [{}]",
        created.id, created.header, created.status
    );
    Ok(())
}

async fn set_status(session: &SessionContext, args: StatusArgs) -> Result<()> {
    let api = session.api();
    let mut ticket = api
        .get_ticket(args.ticket)
        .await
        .with_context(|| format!("failed to fetch ticket #{}", args.ticket))?;
    if ticket.status == args.status {
        println!("Ticket #{} is already {}", ticket.id, ticket.status);
        return Ok(());
    }
    ticket.status = args.status;
    let updated = api
        .update_ticket(&ticket)
        .await
        .with_context(|| format!("failed to update ticket #{}", args.ticket))?;
    println!("Ticket #{} is now {}", updated.id, updated.status);
    Ok(())
}

fn ensure_can_share(viewer: &Viewer, share: bool) -> Result<()> {
    if share && !viewer.role.can_share() {
        bail!("only administrators can share to the external channel");
    }
    Ok(())
}

async fn read_attachments(paths: &[PathBuf]) -> Result<Vec<AttachmentUpload>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read attachment {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("{} is not a file", path.display()))?;
        uploads.push(AttachmentUpload {
            file_name,
            content_type: None,
            bytes,
        });
    }
    Ok(uploads)
}

/// Ticket heading followed by the thread, one block per calendar day.
pub fn render_thread(viewer: &Viewer, thread: &MessageThread, now: DateTime<Local>) -> String {
    let mut out = String::new();
    if let Some(ticket) = thread.ticket() {
        let _ = writeln!(
            out,
            "#{} {} [{}]",
            ticket.id, ticket.header, ticket.status
        );
    }
    if thread.is_empty() {
        let _ = writeln!(out, "  (no messages)");
        return out;
    }
    for group in presenter::group_at(thread.messages(), now) {
        let _ = writeln!(out, "-- {} --", group.label);
        for message in group.messages {
            let _ = writeln!(out, "{}", render_message(viewer, thread.ticket(), message, now));
        }
    }
    out
}

fn render_message(
    viewer: &Viewer,
    ticket: Option<&Ticket>,
    message: &Message,
    now: DateTime<Local>,
) -> String {
    let side = ticket.map_or(Side::Theirs, |ticket| presenter::side(viewer, ticket, message));
    let author = match (side, viewer.role) {
        (Side::Mine, _) => "you",
        (Side::Theirs, Role::User) => "support",
        (Side::Theirs, Role::Admin) => "customer",
    };
    let mut line = format!(
        "  {} {author}: {}",
        presenter::time_label(message, now),
        message.body
    );
    if message.share == Some(true) {
        line.push_str(" (shared)");
    }
    for attachment in &message.attachments {
        let _ = write!(line, "\n        attachment: {}", presenter::attachment_name(attachment));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared::models::Timestamp;

    fn ticket() -> Ticket {
        Ticket {
            id: 12,
            header: "VPN down".to_string(),
            status: TicketStatus::Active,
            created_at: Timestamp::from_millis(0).unwrap(),
            user_id: 5,
            admin_id: Some(9),
            viewed_by_user: true,
            viewed_by_admin: false,
        }
    }

    fn message(id: MessageId, sender_id: i64, at: DateTime<Local>, body: &str) -> Message {
        Message {
            id,
            body: body.to_string(),
            attachments: Vec::new(),
            sender_id,
            created_at: Some(Timestamp(at.with_timezone(&chrono::Utc))),
            share: None,
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 4, 2, 15, 0, 0).unwrap()
    }

    #[test]
    fn thread_renders_day_blocks_in_time_order() {
        let today = now() - chrono::Duration::hours(1);
        let yesterday = now() - chrono::Duration::days(1);
        let mut thread = MessageThread::new(12);
        thread.set_ticket(ticket());
        thread.apply_history(vec![
            message(2, 9, today, "Try again now"),
            message(1, 5, yesterday, "VPN is down"),
        ]);

        let rendered = render_thread(&Viewer::new(Role::User, 5), &thread, now());
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[0], "#12 VPN down [active]");
        assert_eq!(lines[1], "-- Yesterday --");
        assert_eq!(lines[2], "  15:00 you: VPN is down");
        assert_eq!(lines[3], "-- Today --");
        assert_eq!(lines[4], "  14:00 support: Try again now");
    }

    #[test]
    fn admin_sees_customer_and_attachment_names() {
        let mut reply = message(3, 5, now(), "Screenshot attached");
        reply.attachments = vec!["https://files.desk.test/a/b/error.png?sig=1".to_string()];
        reply.share = Some(true);

        let line = render_message(&Viewer::new(Role::Admin, 9), Some(&ticket()), &reply, now());

        assert_eq!(
            line,
            "  15:00 customer: Screenshot attached (shared)\n        attachment: error.png"
        );
    }

    #[test]
    fn users_cannot_share() {
        assert!(ensure_can_share(&Viewer::new(Role::User, 5), true).is_err());
        assert!(ensure_can_share(&Viewer::new(Role::User, 5), false).is_ok());
        assert!(ensure_can_share(&Viewer::new(Role::Admin, 9), true).is_ok());
    }

    #[tokio::test]
    async fn attachments_are_read_with_their_file_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let uploads = read_attachments(&[path]).await.unwrap();

        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].file_name, "notes.txt");
        assert_eq!(uploads[0].bytes, b"hello");
        assert_eq!(uploads[0].content_type, None);
    }

    #[tokio::test]
    async fn missing_attachment_is_reported() {
        let error = read_attachments(&[PathBuf::from("/definitely/not/here.txt")])
            .await
            .unwrap_err();
        assert!(error.to_string().contains("failed to read attachment"));
    }
}
