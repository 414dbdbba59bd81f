use std::{
    fmt::Write as FmtWrite,
    io::{self, IsTerminal, Stdout, Write},
};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    style::Print,
    terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand, QueueableCommand,
};
use ferris_depth_engine::{
    engine::FeedStatus,
    projector::{Projection, ProjectionRow},
    trades::TradeView,
};
use rust_decimal::{prelude::ToPrimitive, Decimal};

const DEPTH_BAR_WIDTH: usize = 10;
const TRADE_TAPE_ROWS: usize = 8;

pub(crate) struct TerminalRenderer {
    stdout: Stdout,
    previous_line_count: usize,
    interactive: bool,
}

impl TerminalRenderer {
    pub(crate) fn new() -> anyhow::Result<Self> {
        let interactive = io::stdout().is_terminal();
        let mut stdout = io::stdout();

        if interactive {
            stdout
                .execute(EnterAlternateScreen)
                .context("failed to enter alternate terminal screen")?;
            stdout
                .execute(Hide)
                .context("failed to hide terminal cursor")?;
            stdout
                .execute(Clear(ClearType::All))
                .context("failed to clear terminal screen")?;
            stdout
                .execute(MoveTo(0, 0))
                .context("failed to move terminal cursor")?;
            stdout.flush().context("failed to flush terminal output")?;
        }

        Ok(Self {
            stdout,
            previous_line_count: 0,
            interactive,
        })
    }

    pub(crate) fn render(&mut self, frame: &str) -> anyhow::Result<()> {
        if !self.interactive {
            println!("{frame}");
            return Ok(());
        }

        let lines: Vec<&str> = frame.lines().collect();

        for (index, line) in lines.iter().enumerate() {
            let Ok(row) = u16::try_from(index) else {
                break;
            };
            self.stdout
                .queue(MoveTo(0, row))
                .context("failed to move cursor during frame render")?;
            self.stdout
                .queue(Clear(ClearType::CurrentLine))
                .context("failed to clear line during frame render")?;
            self.stdout
                .queue(Print(*line))
                .context("failed to print frame line")?;
        }

        for index in lines.len()..self.previous_line_count {
            let Ok(row) = u16::try_from(index) else {
                break;
            };
            self.stdout
                .queue(MoveTo(0, row))
                .context("failed to move cursor during line cleanup")?;
            self.stdout
                .queue(Clear(ClearType::CurrentLine))
                .context("failed to clear stale frame line")?;
        }

        self.stdout
            .flush()
            .context("failed to flush terminal frame")?;
        self.previous_line_count = lines.len();

        Ok(())
    }
}

impl Drop for TerminalRenderer {
    fn drop(&mut self) {
        if !self.interactive {
            return;
        }

        let _ = self.stdout.execute(Show);
        let _ = self.stdout.execute(LeaveAlternateScreen);
        let _ = self.stdout.flush();
    }
}

pub(crate) fn build_depth_frame(
    symbol: &str,
    projection: &Projection,
    status: &FeedStatus,
    trades: &[TradeView],
    rows: usize,
) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "depth stream | symbol={} | generation={} | connected={} | ready={}",
        symbol,
        status.generation,
        yes_no(status.connected),
        yes_no(status.ready),
    );
    let _ = writeln!(
        output,
        "msgs_per_sec={:.1} reconnects={} pending={} last_update={}",
        status.messages_per_second,
        status.reconnects,
        status.pending_buffer_len,
        status
            .last_update_ms
            .and_then(iso8601_millis)
            .unwrap_or_else(|| "-".to_string()),
    );
    let _ = writeln!(
        output,
        "spread={} spread_pct={}% mid={} best_bid={} best_ask={}",
        format_decimal(projection.spread),
        format_decimal(projection.spread_percent.round_dp(4)),
        format_decimal(projection.mid),
        format_row_price(projection.best_bid.as_ref()),
        format_row_price(projection.best_ask.as_ref()),
    );
    if let Some(reason) = status.last_error.as_deref() {
        let _ = writeln!(output, "last_error: {}", reason.replace('\n', " | "));
    }
    let _ = writeln!(output);

    let max_total = projection.max_bid_total.max(projection.max_ask_total);
    let _ = writeln!(output, "{:>14} {:>14} {:>14} {:<10}", "price", "size", "total", "depth");

    for slot in (0..rows).rev() {
        let row = projection.ask_rows.get(slot);
        let _ = writeln!(output, "{}", format_book_row(row, max_total));
    }

    let _ = writeln!(output, "---------------------------- MID ----------------------------");

    for slot in 0..rows {
        let row = projection.bid_rows.get(slot);
        let _ = writeln!(output, "{}", format_book_row(row, max_total));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "trades:");
    for view in trades.iter().take(TRADE_TAPE_ROWS) {
        let _ = writeln!(output, "{}", format_trade_line(view));
    }

    output
}

pub(crate) fn build_waiting_frame(symbol: &str, detail: &str) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "depth stream | symbol={symbol}");
    let _ = writeln!(output, "{}", detail.replace('\n', " | "));
    output
}

fn format_book_row(row: Option<&ProjectionRow>, max_total: Decimal) -> String {
    let Some(row) = row else {
        return format!("{:>14} {:>14} {:>14} {:<10}", "-", "-", "-", "-");
    };

    format!(
        "{:>14} {:>14} {:>14} {:<10}",
        format_decimal(row.price),
        format_decimal(row.quantity),
        format_decimal(row.total),
        format_depth_bar(row.total, max_total, DEPTH_BAR_WIDTH),
    )
}

pub(crate) fn format_depth_bar(value: Decimal, max_value: Decimal, width: usize) -> String {
    if width == 0 {
        return String::new();
    }

    if max_value <= Decimal::ZERO || value <= Decimal::ZERO {
        return "-".repeat(width);
    }

    let ratio = (value / max_value).min(Decimal::ONE);
    let filled = (ratio * Decimal::from(width as u64))
        .round()
        .to_usize()
        .unwrap_or(0)
        .min(width);
    format!("{}{}", "#".repeat(filled), "-".repeat(width - filled))
}

pub(crate) fn format_trade_line(view: &TradeView) -> String {
    let trade = &view.trade;
    let time = iso8601_millis(trade.timestamp).unwrap_or_else(|| "unknown-time".to_string());
    let side = if trade.aggressive_buy { "BUY" } else { "SELL" };
    let flash = if view.is_new { " *" } else { "" };

    format!(
        "{} side={:<4} price={:<14} qty={:<14} id={}{}",
        time,
        side,
        format_decimal(trade.price),
        format_decimal(trade.quantity),
        trade.id,
        flash,
    )
}

pub(crate) fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

fn format_row_price(row: Option<&ProjectionRow>) -> String {
    row.map(|row| format_decimal(row.price))
        .unwrap_or_else(|| "-".to_string())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub(crate) fn iso8601_millis(timestamp: u64) -> Option<String> {
    chrono::DateTime::<Utc>::from_timestamp_millis(timestamp as i64)
        .map(|value| value.to_rfc3339_opts(SecondsFormat::Millis, true))
}
