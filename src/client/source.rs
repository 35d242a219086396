//! Bet record sources feeding the pipeline producer.

use std::collections::VecDeque;
use std::path::Path;

use futures::future::BoxFuture;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::bet::{parse_birth_date, Bet};
use crate::error::{LotteryError, Result};

/// Source of bets for one agency.
///
/// `Ok(None)` marks exhaustion; an error stops the producer.
pub trait BetSource: Send {
    fn next_bet(&mut self) -> BoxFuture<'_, Result<Option<Bet>>>;
}

/// Reads `first,last,document,YYYY-MM-DD,number` records, one per line.
pub struct CsvBetSource<R> {
    lines: Lines<R>,
    agency: u32,
    line_no: usize,
}

impl<R> CsvBetSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R, agency: u32) -> Self {
        Self {
            lines: reader.lines(),
            agency,
            line_no: 0,
        }
    }

    async fn read_next(&mut self) -> Result<Option<Bet>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return parse_record(line, self.agency)
                .map(Some)
                .map_err(|e| LotteryError::Format(format!("line {}: {}", self.line_no, e)));
        }
        Ok(None)
    }
}

impl CsvBetSource<BufReader<File>> {
    /// Open a dataset file for `agency`.
    pub async fn open(path: impl AsRef<Path>, agency: u32) -> Result<Self> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self::new(BufReader::new(file), agency))
    }
}

impl<R> BetSource for CsvBetSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn next_bet(&mut self) -> BoxFuture<'_, Result<Option<Bet>>> {
        Box::pin(self.read_next())
    }
}

const RECORD_FIELDS: usize = 5;

fn parse_record(line: &str, agency: u32) -> std::result::Result<Bet, String> {
    let fields = split_record(line)?;
    if fields.len() != RECORD_FIELDS {
        return Err(format!(
            "expected {} fields, found {}",
            RECORD_FIELDS,
            fields.len()
        ));
    }
    let fields: Vec<&str> = fields.iter().map(|f| f.trim()).collect();

    let document = fields[2]
        .parse::<u32>()
        .map_err(|e| format!("invalid document {:?}: {}", fields[2], e))?;
    let birth_date = parse_birth_date(fields[3]).map_err(|e| e.to_string())?;
    let number = fields[4]
        .parse::<u32>()
        .map_err(|e| format!("invalid number {:?}: {}", fields[4], e))?;

    Ok(Bet::new(
        agency, fields[0], fields[1], document, birth_date, number,
    ))
}

/// Split one CSV line. Fields may be double-quoted; `""` inside quotes is a
/// literal quote.
fn split_record(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            ('"', true) => quoted = false,
            ('"', false) if field.trim().is_empty() => {
                field.clear();
                quoted = true;
            }
            (',', false) => fields.push(std::mem::take(&mut field)),
            (c, _) => field.push(c),
        }
    }
    if quoted {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(field);
    Ok(fields)
}

/// In-memory list of bets.
#[derive(Debug, Default)]
pub struct MemorySource {
    bets: VecDeque<Bet>,
}

impl MemorySource {
    pub fn new(bets: impl IntoIterator<Item = Bet>) -> Self {
        Self {
            bets: bets.into_iter().collect(),
        }
    }
}

impl BetSource for MemorySource {
    fn next_bet(&mut self) -> BoxFuture<'_, Result<Option<Bet>>> {
        let bet = self.bets.pop_front();
        Box::pin(async move { Ok(bet) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    async fn drain(source: &mut dyn BetSource) -> Result<Vec<Bet>> {
        let mut bets = Vec::new();
        while let Some(bet) = source.next_bet().await? {
            bets.push(bet);
        }
        Ok(bets)
    }

    #[tokio::test]
    async fn test_csv_records() {
        let data = "Santiago Lionel,Lorca,30904465,1999-03-17,7574\n\nJoaquin,Gomez, 28000111 ,1985-11-02,12\n";
        let mut source = CsvBetSource::new(data.as_bytes(), 4);

        let bets = drain(&mut source).await.unwrap();

        assert_eq!(bets.len(), 2);
        assert_eq!(bets[0].agency(), 4);
        assert_eq!(bets[0].first_name(), "Santiago Lionel");
        assert_eq!(bets[0].document(), 30904465);
        assert_eq!(
            bets[0].birth_date(),
            NaiveDate::from_ymd_opt(1999, 3, 17).unwrap()
        );
        assert!(bets[0].has_won(7574));
        assert_eq!(bets[1].document(), 28000111);
    }

    #[tokio::test]
    async fn test_csv_bad_record_reports_line() {
        let data = "A,B,1,2000-01-01,1\nA,B,notanumber,2000-01-01,1\n";
        let mut source = CsvBetSource::new(data.as_bytes(), 1);

        assert!(source.next_bet().await.unwrap().is_some());
        let err = source.next_bet().await.unwrap_err();
        assert!(matches!(err, LotteryError::Format(_)));
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_csv_short_record() {
        let mut source = CsvBetSource::new("A,B,1\n".as_bytes(), 1);
        assert!(source.next_bet().await.is_err());
    }

    #[tokio::test]
    async fn test_csv_extra_fields_rejected() {
        let mut source = CsvBetSource::new("A,B,1,2000-01-01,1,extra\n".as_bytes(), 1);
        let err = source.next_bet().await.unwrap_err();
        assert!(err.to_string().contains("found 6"));
    }

    #[tokio::test]
    async fn test_csv_quoted_fields() {
        let data = "\"Maria, Jose\",\"O\"\"Neil\",12,1990-05-06,3\n\"open,B,1,2000-01-01,1\n";
        let mut source = CsvBetSource::new(data.as_bytes(), 2);

        let bet = source.next_bet().await.unwrap().unwrap();
        assert_eq!(bet.first_name(), "Maria, Jose");
        assert_eq!(bet.last_name(), "O\"Neil");
        assert_eq!(bet.document(), 12);

        let err = source.next_bet().await.unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_csv_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Ana,Paz,7,2001-02-03,99").unwrap();
        writeln!(file, "Luis,Sosa,8,1970-12-31,7574").unwrap();

        let mut source = CsvBetSource::open(file.path(), 2).await.unwrap();
        let bets = drain(&mut source).await.unwrap();

        assert_eq!(bets.len(), 2);
        assert_eq!(bets[1].last_name(), "Sosa");
    }

    #[tokio::test]
    async fn test_memory_source() {
        let bet = Bet::new(1, "a", "b", 1, NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(), 1);
        let mut source = MemorySource::new(vec![bet.clone()]);

        assert_eq!(drain(&mut source).await.unwrap(), vec![bet]);
        assert!(source.next_bet().await.unwrap().is_none());
    }
}
