//! Line-oriented command parsing for the terminal front end.

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search { query: String, page: u32 },
    NextPage,
    PreviousPage,
    /// Row numbers are 1-based, as printed.
    Play(usize),
    Favorite(usize),
    /// Favorite every row of the current results.
    FavoriteAll,
    Download(usize),
    ListFavorites,
    /// Plays a stored favorite by its database id.
    PlayFavorite(i64),
    RemoveFavorite(i64),
    TogglePlayback,
    StopPlayback,
    Volume(u8),
    /// Seek-bar percent.
    Seek(u8),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  search <query> [page]   search the catalog
  next | prev             move through result pages
  play <row>              cache and play a search result
  fav <row>               cache and favorite a search result
  favall                  cache and favorite every search result
  download <row>          save a search result into the songs directory
  favs                    reload and list favorites
  playfav <id>            play a favorite
  unfav <id>              remove a favorite
  toggle                  pause, resume, or play the first favorite
  stop                    stop playback
  vol <0-100>             set the volume
  seek <0-100>            jump to a percentage of the current track
  status                  show playback progress
  quit";

fn parse_row(argument: Option<&str>) -> Result<usize, String> {
    let raw = argument.ok_or_else(|| "missing row number".to_string())?;
    match raw.parse::<usize>() {
        Ok(row) if row >= 1 => Ok(row),
        _ => Err(format!("invalid row number '{raw}'")),
    }
}

fn parse_percent(argument: Option<&str>) -> Result<u8, String> {
    let raw = argument.ok_or_else(|| "missing percentage".to_string())?;
    match raw.parse::<u8>() {
        Ok(percent) if percent <= 100 => Ok(percent),
        _ => Err(format!("expected 0-100, got '{raw}'")),
    }
}

fn parse_id(argument: Option<&str>) -> Result<i64, String> {
    let raw = argument.ok_or_else(|| "missing favorite id".to_string())?;
    raw.parse::<i64>()
        .map_err(|_| format!("invalid favorite id '{raw}'"))
}

/// Parses a line; `Ok(None)` for blank input.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let argument = (!rest.is_empty()).then_some(rest);
    let command = match verb.to_ascii_lowercase().as_str() {
        "search" | "s" => {
            let Some(rest) = argument else {
                return Err("missing search query".to_string());
            };
            // A trailing number selects the page: `search 成都 2`.
            match rest.rsplit_once(char::is_whitespace) {
                Some((query, page)) if page.parse::<u32>().is_ok() => Command::Search {
                    query: query.trim().to_string(),
                    page: page.parse::<u32>().map_or(1, |page| page.max(1)),
                },
                _ => Command::Search {
                    query: rest.to_string(),
                    page: 1,
                },
            }
        }
        "next" | "n" => Command::NextPage,
        "prev" | "p" => Command::PreviousPage,
        "play" => Command::Play(parse_row(argument)?),
        "fav" => Command::Favorite(parse_row(argument)?),
        "favall" => Command::FavoriteAll,
        "download" | "dl" => Command::Download(parse_row(argument)?),
        "favs" => Command::ListFavorites,
        "playfav" => Command::PlayFavorite(parse_id(argument)?),
        "unfav" => Command::RemoveFavorite(parse_id(argument)?),
        "toggle" | "pause" | "resume" => Command::TogglePlayback,
        "stop" => Command::StopPlayback,
        "vol" | "volume" => Command::Volume(parse_percent(argument)?),
        "seek" => Command::Seek(parse_percent(argument)?),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(Some(command))
}
