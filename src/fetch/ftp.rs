//! Minimal passive-mode FTP client for directory listings.
//!
//! Only what a `LIST` of a public mirror needs: anonymous login, `CWD`,
//! `PASV` and `LIST`. Replies follow RFC 959, including multi-line replies
//! of the form `123-first line` ... `123 last line`.

use log::debug;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};
use std::time::Duration;
use url::Url;

use super::NetworkError;

const FTP_TIMEOUT: Duration = Duration::from_secs(60);
const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// A parsed server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Reply {
    pub(super) code: u16,
    pub(super) text: String,
}

impl Reply {
    fn is_positive(&self) -> bool {
        (100..400).contains(&self.code)
    }
}

#[derive(Debug)]
enum FtpFailure {
    Io(io::Error),
    Rejected { command: String, reply: Reply },
    Malformed(String),
}

impl From<io::Error> for FtpFailure {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl FtpFailure {
    fn into_network_error(self, url: &str) -> NetworkError {
        match self {
            Self::Io(source) => NetworkError::Io {
                url: url.to_owned(),
                source,
            },
            Self::Rejected { command, reply } => NetworkError::Ftp {
                url: url.to_owned(),
                reason: format!("{command} rejected: {} {}", reply.code, reply.text),
            },
            Self::Malformed(reason) => NetworkError::Ftp {
                url: url.to_owned(),
                reason,
            },
        }
    }
}

/// Fetch the `LIST` output for the directory named by an `ftp://` URL.
pub(super) fn list_directory(url: &str) -> Result<String, NetworkError> {
    let parsed = Url::parse(url).map_err(|e| NetworkError::Ftp {
        url: url.to_owned(),
        reason: e.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| NetworkError::Ftp {
        url: url.to_owned(),
        reason: "missing host".to_owned(),
    })?;
    let port = parsed.port_or_known_default().unwrap_or(21);
    let path = percent_encoding::percent_decode_str(parsed.path())
        .decode_utf8_lossy()
        .into_owned();

    debug!("FTP LIST {host}:{port}{path}");
    fetch_listing(host, port, &path).map_err(|e| e.into_network_error(url))
}

fn fetch_listing(host: &str, port: u16, path: &str) -> Result<String, FtpFailure> {
    let mut session = Session::connect(host, port)?;
    session.login()?;
    session.command("TYPE A")?;
    if !path.is_empty() && path != "/" {
        session.command(&format!("CWD {path}"))?;
    }
    let pasv = session.command("PASV")?;
    let data_addr = parse_pasv(&pasv.text)
        .ok_or_else(|| FtpFailure::Malformed(format!("unparseable PASV reply: {}", pasv.text)))?;
    let mut data = TcpStream::connect(data_addr)?;
    data.set_read_timeout(Some(FTP_TIMEOUT))?;

    session.command("LIST")?;
    let mut listing = Vec::new();
    data.read_to_end(&mut listing)?;
    drop(data);
    session.expect_completion("LIST")?;
    session.quit();
    Ok(String::from_utf8_lossy(&listing).into_owned())
}

struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Session {
    fn connect(host: &str, port: u16) -> Result<Self, FtpFailure> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_read_timeout(Some(FTP_TIMEOUT))?;
        stream.set_write_timeout(Some(FTP_TIMEOUT))?;
        let mut session = Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        };
        session.expect_positive("connect")?;
        Ok(session)
    }

    fn login(&mut self) -> Result<(), FtpFailure> {
        let reply = self.command("USER anonymous")?;
        if reply.code == 331 {
            self.command(&format!("PASS {ANONYMOUS_PASSWORD}"))?;
        }
        Ok(())
    }

    fn command(&mut self, command: &str) -> Result<Reply, FtpFailure> {
        write!(self.writer, "{command}\r\n")?;
        self.writer.flush()?;
        self.expect_positive(command)
    }

    fn expect_positive(&mut self, command: &str) -> Result<Reply, FtpFailure> {
        let reply = read_reply(&mut self.reader)?;
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(FtpFailure::Rejected {
                command: command.to_owned(),
                reply,
            })
        }
    }

    fn expect_completion(&mut self, command: &str) -> Result<Reply, FtpFailure> {
        let reply = read_reply(&mut self.reader)?;
        if (200..300).contains(&reply.code) {
            Ok(reply)
        } else {
            Err(FtpFailure::Rejected {
                command: command.to_owned(),
                reply,
            })
        }
    }

    fn quit(mut self) {
        if let Err(err) = write!(self.writer, "QUIT\r\n") {
            debug!("FTP QUIT failed: {err}");
        }
    }
}

/// Read one (possibly multi-line) reply from the control connection.
pub(super) fn read_reply(reader: &mut impl BufRead) -> io::Result<Reply> {
    let first = read_line(reader)?;
    let (code, separator, text) = split_reply_line(&first).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, format!("bad FTP reply: {first}"))
    })?;
    let mut lines = vec![text.to_owned()];
    if separator == '-' {
        loop {
            let line = read_line(reader)?;
            match split_reply_line(&line) {
                Some((last_code, ' ', last_text)) if last_code == code => {
                    lines.push(last_text.to_owned());
                    break;
                }
                _ => lines.push(line),
            }
        }
    }
    Ok(Reply {
        code,
        text: lines.join("\n"),
    })
}

fn read_line(reader: &mut impl BufRead) -> io::Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "FTP control connection closed",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

fn split_reply_line(line: &str) -> Option<(u16, char, &str)> {
    let code_text = line.get(..3)?;
    if !code_text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = code_text.parse().ok()?;
    let rest = line.get(3..)?;
    let mut chars = rest.chars();
    match chars.next() {
        None => Some((code, ' ', "")),
        Some(separator @ (' ' | '-')) => Some((code, separator, chars.as_str())),
        Some(_) => None,
    }
}

/// Extract the data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
/// reply text.
pub(super) fn parse_pasv(text: &str) -> Option<SocketAddrV4> {
    let start = text.find('(')?;
    let end = start + text.get(start..)?.find(')')?;
    let numbers: Vec<u8> = text
        .get(start + 1..end)?
        .split(',')
        .map(|part| part.trim().parse().ok())
        .collect::<Option<_>>()?;
    let [a, b, c, d, high, low] = numbers.as_slice() else {
        return None;
    };
    let port = (u16::from(*high) << 8) | u16::from(*low);
    Some(SocketAddrV4::new(Ipv4Addr::new(*a, *b, *c, *d), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[test]
    fn reads_single_line_reply() {
        let mut input = Cursor::new("220 Service ready\r\n");
        let reply = read_reply(&mut input).expect("reply");
        assert_eq!(reply.code, 220);
        assert_eq!(reply.text, "Service ready");
    }

    #[test]
    fn reads_multi_line_reply() {
        let mut input = Cursor::new(concat!(
            "230-Welcome to the GNU mirror\r\n",
            "230-Please be nice\r\n",
            " 230 is not the end\r\n",
            "230 Login successful.\r\n",
            "200 next\r\n",
        ));
        let reply = read_reply(&mut input).expect("reply");
        assert_eq!(reply.code, 230);
        assert!(reply.text.ends_with("Login successful."));
        assert_eq!(reply.text.lines().count(), 4);

        let next = read_reply(&mut input).expect("next reply");
        assert_eq!(next.code, 200);
    }

    #[test]
    fn closed_connection_is_an_error() {
        let mut input = Cursor::new("");
        let err = read_reply(&mut input).expect_err("eof");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn garbage_reply_is_invalid_data() {
        let mut input = Cursor::new("hello\r\n");
        let err = read_reply(&mut input).expect_err("garbage");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn parses_pasv_address() {
        let addr = parse_pasv("Entering Passive Mode (209,51,188,20,195,80).").expect("addr");
        assert_eq!(addr.ip(), &Ipv4Addr::new(209, 51, 188, 20));
        assert_eq!(addr.port(), 195 * 256 + 80);
    }

    #[rstest]
    #[case("Entering Passive Mode")]
    #[case("Entering Passive Mode (1,2,3,4,5)")]
    #[case("Entering Passive Mode (1,2,3,4,5,300)")]
    fn rejects_bad_pasv_replies(#[case] text: &str) {
        assert!(parse_pasv(text).is_none());
    }

    #[rstest]
    #[case(150, true)]
    #[case(331, true)]
    #[case(421, false)]
    #[case(550, false)]
    fn classifies_reply_codes(#[case] code: u16, #[case] positive: bool) {
        let reply = Reply {
            code,
            text: String::new(),
        };
        assert_eq!(reply.is_positive(), positive);
    }

    #[test]
    fn rejected_command_maps_to_ftp_error() {
        let failure = FtpFailure::Rejected {
            command: "CWD /pub/gnu/libiconv".to_owned(),
            reply: Reply {
                code: 550,
                text: "No such directory".to_owned(),
            },
        };
        let err = failure.into_network_error("ftp://ftp.gnu.org/pub/gnu/libiconv/");
        assert!(err.to_string().contains("550 No such directory"));
    }
}
