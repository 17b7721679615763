//! Channel commands read line by line, e.g. `charge#timer1-departure-hour 7`.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use log::{debug, warn};

use crate::channels::{ChannelUid, Command};

/// `None` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> Result<Option<(ChannelUid, Command)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (channel, value) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| format!("expected `<group>#<channel> <value>`, got {:?}", line))?;
    let channel: ChannelUid = channel.parse()?;
    let command: Command = value.parse()?;
    Ok(Some((channel, command)))
}

/// Forward parsed commands from `reader` on a background thread.
///
/// The receiver disconnects once the reader hits end of input or fails.
pub fn spawn_reader<R>(reader: R) -> Result<Receiver<(ChannelUid, Command)>, String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("command-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Reading commands failed: {}", e);
                        break;
                    }
                };
                match parse_line(&line) {
                    Ok(Some(command)) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Ignoring command line: {}", e),
                }
            }
            debug!("Command input closed");
        })
        .map_err(|e| format!("starting command reader failed: {}", e))?;
    Ok(rx)
}

pub fn spawn_stdin_reader() -> Result<Receiver<(ChannelUid, Command)>, String> {
    spawn_reader(std::io::BufReader::new(std::io::stdin()))
}
