use ferris_depth_engine::{
    projector::{GROUPING_MULTIPLIERS, MAX_DISPLAY_ROWS, MIN_DISPLAY_ROWS},
    Config,
};

const USAGE: &str = r#"Usage:
  cargo run --bin depth_stream -- [options]

Options:
  --symbol <symbol>        Market symbol (default: BTCUSDT)
  --rows <count>           Display rows per side (5-100, default: 20)
  --group <multiplier>     Price grouping multiplier: 1, 5, 10 or 50
  --duration-secs <secs>   Stop after this duration
  --rest-url <url>         Snapshot/metadata REST base URL override
  --ws-url <url>           Websocket base URL override

Examples:
  cargo run --bin depth_stream
  cargo run --bin depth_stream -- --symbol ETHUSDT --rows 15 --group 5
  cargo run --bin depth_stream -- --duration-secs 30

Notes:
  Environment variables (SYMBOL, WS_BASE_URL, ...) provide defaults;
  command-line flags override them.
"#;

#[derive(Debug, Default, Clone)]
pub(crate) struct CliOptions {
    pub(crate) symbol: Option<String>,
    pub(crate) rows: Option<usize>,
    pub(crate) grouping: Option<u32>,
    pub(crate) duration_secs: Option<u64>,
    pub(crate) rest_url: Option<String>,
    pub(crate) ws_url: Option<String>,
}

impl CliOptions {
    pub(crate) fn apply(&self, config: &mut Config) {
        if let Some(symbol) = &self.symbol {
            config.symbol = symbol.trim().to_ascii_uppercase();
        }
        if let Some(rows) = self.rows {
            config.display_rows = rows.clamp(MIN_DISPLAY_ROWS, MAX_DISPLAY_ROWS);
        }
        if let Some(grouping) = self.grouping {
            config.grouping_multiplier = grouping;
        }
        if let Some(rest_url) = &self.rest_url {
            config.rest_base_url = rest_url.trim_end_matches('/').to_string();
        }
        if let Some(ws_url) = &self.ws_url {
            config.ws_base_url = ws_url.trim_end_matches('/').to_string();
        }
    }
}

#[derive(Debug)]
pub(crate) enum ParseResult {
    Help,
    Run(CliOptions),
}

pub(crate) fn print_usage() {
    println!("{USAGE}");
}

pub(crate) fn parse_args(args: &[String]) -> Result<ParseResult, String> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(ParseResult::Help);
    }

    let mut options = CliOptions::default();

    let mut index = 0usize;
    while index < args.len() {
        let flag = &args[index];
        let value = |i: &mut usize| -> Result<String, String> {
            let next = *i + 1;
            if next >= args.len() {
                return Err(format!("missing value for `{flag}`"));
            }
            *i = next;
            Ok(args[*i].clone())
        };

        match flag.as_str() {
            "--symbol" => {
                let symbol = value(&mut index)?;
                if symbol.trim().is_empty() {
                    return Err("`--symbol` cannot be empty".to_string());
                }
                options.symbol = Some(symbol);
            }
            "--rows" => {
                options.rows = Some(parse_usize_gt_zero("--rows", &value(&mut index)?)?);
            }
            "--group" => {
                let grouping = value(&mut index)?
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| "`--group` expects a positive integer".to_string())?;
                if !GROUPING_MULTIPLIERS.contains(&grouping) {
                    return Err(format!(
                        "`--group` must be one of {GROUPING_MULTIPLIERS:?} (got {grouping})"
                    ));
                }
                options.grouping = Some(grouping);
            }
            "--duration-secs" => {
                options.duration_secs =
                    Some(parse_u64_gt_zero("--duration-secs", &value(&mut index)?)?);
            }
            "--rest-url" => {
                options.rest_url = Some(value(&mut index)?);
            }
            "--ws-url" => {
                options.ws_url = Some(value(&mut index)?);
            }
            _ => {
                return Err(format!("unknown argument `{flag}`"));
            }
        }

        index += 1;
    }

    Ok(ParseResult::Run(options))
}

fn parse_u64_gt_zero(field: &str, value: &str) -> Result<u64, String> {
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("`{field}` expects a positive integer"))?;
    if parsed == 0 {
        return Err(format!("`{field}` must be greater than 0"));
    }
    Ok(parsed)
}

fn parse_usize_gt_zero(field: &str, value: &str) -> Result<usize, String> {
    let parsed = value
        .trim()
        .parse::<usize>()
        .map_err(|_| format!("`{field}` expects a positive integer"))?;
    if parsed == 0 {
        return Err(format!("`{field}` must be greater than 0"));
    }
    Ok(parsed)
}
