use std::fmt::Write as _;

use anyhow::{Context, Result};
use clap::Args;
use client::{TicketBoard, TicketListScreen};
use shared::{
    config::ClientConfig,
    models::{SortOrder, TicketQuery, TicketStatus},
};
use tokio::signal;

use super::{describe_state, next_state, session::SessionContext};

#[derive(Args, Debug)]
#[command(about = "List tickets, optionally watching the board for live updates")]
pub struct ListArgs {
    /// Zero-based page number
    #[arg(long, default_value_t = 0)]
    pub page: u32,

    /// Tickets per page; defaults to the configured page size
    #[arg(long, short)]
    pub size: Option<u32>,

    /// Only tickets with this status
    #[arg(long, help = "Only tickets with this status (pending, active, completed, urgent)")]
    pub status: Option<TicketStatus>,

    /// Only tickets whose header contains this text
    #[arg(long)]
    pub header: Option<String>,

    /// Creation date ordering
    #[arg(long, default_value = "desc", help = "Creation date ordering (asc or desc)")]
    pub sort: SortOrder,

    /// Only tickets this session has not viewed yet
    #[arg(long)]
    pub unread: bool,

    /// Keep the board open and apply pushed tickets and view changes
    #[arg(long, short, help = "Keep the board open and apply live updates until Ctrl+C")]
    pub watch: bool,
}

impl ListArgs {
    fn query(&self, page_size: u32) -> TicketQuery {
        TicketQuery {
            page: self.page,
            size: page_size,
            status: self.status,
            header: self
                .header
                .as_deref()
                .map(str::trim)
                .filter(|header| !header.is_empty())
                .map(str::to_string),
            sort_by_date: self.sort,
            unread_only: self.unread,
        }
    }
}

pub async fn list(config: &ClientConfig, args: ListArgs) -> Result<()> {
    let session = SessionContext::restore(config)?;
    let query = args.query(config.page_size);

    if args.watch {
        watch(config, &session, query).await?;
    } else {
        let mut board = TicketBoard::new(session.viewer(), query.clone());
        board
            .load_page(&session.client, query)
            .await
            .context("failed to fetch tickets")?;
        print!("{}", render_board(&board));
    }

    session.persist();
    Ok(())
}

async fn watch(config: &ClientConfig, session: &SessionContext, query: TicketQuery) -> Result<()> {
    let mut screen = TicketListScreen::open(
        session.api(),
        session.connector(config),
        session.viewer(),
        query.clone(),
        config.reconnect_delay(),
    );
    if let Err(err) = screen.load(query).await {
        screen.close().await;
        return Err(err).context("failed to fetch tickets");
    }
    print!("{}", render_board(screen.board()));
    println!("Watching for updates... (press Ctrl+C to stop)");

    let mut connection = screen.connection();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            state = next_state(&mut connection) => eprintln!("[push] {}", describe_state(state)),
            event = screen.next_event() => {
                let Some(event) = event else { break };
                let mut changed = screen.apply(event);
                changed |= screen.drain() > 0;
                if changed {
                    println!();
                    print!("{}", render_board(screen.board()));
                }
            }
        }
    }

    screen.close().await;
    Ok(())
}

/// Plain-text rendering of the board. Unread tickets are starred.
pub fn render_board(board: &TicketBoard) -> String {
    let page = board.page();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Tickets: page {} of {} ({} total, {} unread)",
        page.number + 1,
        page.total_pages.max(1),
        page.total_elements,
        board.unread_count()
    );
    if page.content.is_empty() {
        let _ = writeln!(out, "  No tickets match this filter.");
        return out;
    }
    for ticket in &page.content {
        let marker = if board.viewer().is_unread(ticket) { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{marker} #{:<6} {:<10} {:<40} {}",
            ticket.id,
            ticket.status.as_str(),
            ticket.header,
            ticket.created_at.local().format("%Y-%m-%d %H:%M")
        );
    }
    out
}
