//! Parser for the statement subset the memory endpoint understands.
//!
//! This is exactly what [`MysqlDeparser`](crate::deparse::MysqlDeparser)
//! and the bridge's session/estimate queries produce. Anything else is a
//! syntax error (1064), like a real server would report for garbage.

use crate::driver::DriverError;
use crate::driver::codec::NativeValue;
use crate::driver::types::code;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Backtick-quoted identifier
    Ident(String),
    /// Bare word: keyword or unquoted identifier
    Word(String),
    Str(String),
    Num(String),
    Param,
    Punct(&'static str),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Ident(s) => format!("`{}`", s),
            Token::Word(s) | Token::Num(s) => s.clone(),
            Token::Str(s) => format!("'{}'", s),
            Token::Param => "?".to_string(),
            Token::Punct(p) => (*p).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub database: String,
    pub table: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    IsNotNull,
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Index of the `?` placeholder
    Param(usize),
    /// Number or string literal as text, or the bytes of an `X'..'` literal
    Literal(NativeValue),
    Null,
}

/// `column op operand` or `column IS [NOT] NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: CompareOp,
    pub operand: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select {
        table: TableRef,
        columns: Vec<String>,
        filters: Vec<Filter>,
        for_update: bool,
    },
    Insert {
        table: TableRef,
        columns: Vec<String>,
    },
    Update {
        table: TableRef,
        columns: Vec<String>,
        key: String,
    },
    Delete {
        table: TableRef,
        key: String,
    },
    Set(Vec<(String, String)>),
    ShowWarnings,
    ExplainTable(TableRef),
    ExplainSelect(Box<Statement>),
    /// `SELECT ... FROM information_schema.TABLES WHERE table_schema = '..' AND table_name = '..'`
    TableSize(TableRef),
}

/// A parsed statement and its placeholder count.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub statement: Statement,
    pub param_count: usize,
}

fn syntax_error(near: &str) -> DriverError {
    DriverError::new(
        code::ER_PARSE_ERROR,
        format!(
            "You have an error in your SQL syntax; check the manual that corresponds to your MySQL server version for the right syntax to use near '{}' at line 1",
            near
        ),
    )
}

fn tokenize(sql: &str, backslash_escapes: bool) -> Result<Vec<Token>, DriverError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b if b.is_ascii_whitespace() => i += 1,
            b'`' | b'\'' => {
                // Doubled quote characters escape themselves. Inside string
                // literals a backslash escapes the next byte unless the
                // session runs with NO_BACKSLASH_ESCAPES.
                let mut text = Vec::new();
                let mut at = i + 1;
                loop {
                    let found = if b == b'\'' && backslash_escapes {
                        memchr::memchr2(b, b'\\', &bytes[at..])
                    } else {
                        memchr::memchr(b, &bytes[at..])
                    };
                    let end = found
                        .map(|p| at + p)
                        .ok_or_else(|| syntax_error(&sql[i..]))?;
                    text.extend_from_slice(&bytes[at..end]);
                    if bytes[end] == b'\\' {
                        let escaped = *bytes.get(end + 1).ok_or_else(|| syntax_error(&sql[i..]))?;
                        text.push(match escaped {
                            b'n' => b'\n',
                            b'r' => b'\r',
                            b't' => b'\t',
                            b'0' => 0,
                            other => other,
                        });
                        at = end + 2;
                    } else if bytes.get(end + 1) == Some(&b) {
                        text.push(b);
                        at = end + 2;
                    } else {
                        i = end + 1;
                        break;
                    }
                }
                let text = String::from_utf8(text).map_err(|_| syntax_error(&sql[i..]))?;
                tokens.push(if b == b'`' {
                    Token::Ident(text)
                } else {
                    Token::Str(text)
                });
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push(Token::Num(sql[start..i].to_string()));
            }
            b if b.is_ascii_alphabetic() || b == b'_' || b == b'@' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'@')
                {
                    i += 1;
                }
                tokens.push(Token::Word(sql[start..i].to_string()));
            }
            b'?' => {
                tokens.push(Token::Param);
                i += 1;
            }
            _ => {
                let two = sql.get(i..i + 2).unwrap_or("");
                let punct = match two {
                    "<=" => Some("<="),
                    ">=" => Some(">="),
                    "<>" => Some("<>"),
                    "!=" => Some("!="),
                    _ => None,
                };
                if let Some(p) = punct {
                    tokens.push(Token::Punct(p));
                    i += 2;
                    continue;
                }
                let p = match b {
                    b'(' => "(",
                    b')' => ")",
                    b',' => ",",
                    b'.' => ".",
                    b'=' => "=",
                    b'<' => "<",
                    b'>' => ">",
                    b'*' => "*",
                    b'+' => "+",
                    b'-' => "-",
                    b';' => ";",
                    _ => return Err(syntax_error(&sql[i..])),
                };
                tokens.push(Token::Punct(p));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    params: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self) -> DriverError {
        let near: Vec<String> = self.tokens[self.pos.min(self.tokens.len())..]
            .iter()
            .map(Token::text)
            .collect();
        syntax_error(&near.join(" "))
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.at_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<(), DriverError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), DriverError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn expect_param(&mut self) -> Result<usize, DriverError> {
        match self.peek() {
            Some(Token::Param) => {
                self.pos += 1;
                self.params += 1;
                Ok(self.params - 1)
            }
            _ => Err(self.error()),
        }
    }

    fn ident(&mut self) -> Result<String, DriverError> {
        match self.peek() {
            Some(Token::Ident(s)) | Some(Token::Word(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.error()),
        }
    }

    fn table_ref(&mut self) -> Result<TableRef, DriverError> {
        let first = self.ident()?;
        if self.eat_punct(".") {
            let table = self.ident()?;
            Ok(TableRef {
                database: first,
                table,
            })
        } else {
            // Unqualified names are resolved against the empty database.
            Ok(TableRef {
                database: String::new(),
                table: first,
            })
        }
    }

    fn ident_list(&mut self) -> Result<Vec<String>, DriverError> {
        let mut out = vec![self.ident()?];
        while self.eat_punct(",") {
            out.push(self.ident()?);
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<(), DriverError> {
        self.eat_punct(";");
        if self.pos < self.tokens.len() {
            return Err(self.error());
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<Statement, DriverError> {
        if self.eat_word("SELECT") {
            self.select()
        } else if self.eat_word("INSERT") {
            self.insert()
        } else if self.eat_word("UPDATE") {
            self.update()
        } else if self.eat_word("DELETE") {
            self.delete()
        } else if self.eat_word("SET") {
            self.set()
        } else if self.eat_word("SHOW") {
            self.expect_word("WARNINGS")?;
            Ok(Statement::ShowWarnings)
        } else if self.eat_word("EXPLAIN") || self.eat_word("DESCRIBE") {
            if self.eat_word("SELECT") {
                Ok(Statement::ExplainSelect(Box::new(self.select()?)))
            } else {
                Ok(Statement::ExplainTable(self.table_ref()?))
            }
        } else {
            Err(self.error())
        }
    }

    fn select(&mut self) -> Result<Statement, DriverError> {
        let columns = self.ident_list()?;
        self.expect_word("FROM")?;
        let table = self.table_ref()?;
        let mut filters = Vec::new();
        if self.eat_word("WHERE") {
            loop {
                filters.push(self.filter()?);
                if !self.eat_word("AND") {
                    break;
                }
            }
        }
        let for_update = if self.eat_word("FOR") {
            self.expect_word("UPDATE")?;
            true
        } else {
            false
        };
        Ok(Statement::Select {
            table,
            columns,
            filters,
            for_update,
        })
    }

    fn filter(&mut self) -> Result<Filter, DriverError> {
        let parens = self.eat_punct("(");
        let column = self.ident()?;
        let filter = if self.eat_word("IS") {
            let op = if self.eat_word("NOT") {
                CompareOp::IsNotNull
            } else {
                CompareOp::IsNull
            };
            self.expect_word("NULL")?;
            Filter {
                column,
                op,
                operand: None,
            }
        } else {
            let op = match self.next() {
                Some(Token::Punct("=")) => CompareOp::Eq,
                Some(Token::Punct("<>")) | Some(Token::Punct("!=")) => CompareOp::Ne,
                Some(Token::Punct("<")) => CompareOp::Lt,
                Some(Token::Punct("<=")) => CompareOp::Le,
                Some(Token::Punct(">")) => CompareOp::Gt,
                Some(Token::Punct(">=")) => CompareOp::Ge,
                _ => {
                    self.pos -= 1;
                    return Err(self.error());
                }
            };
            Filter {
                column,
                op,
                operand: Some(self.operand()?),
            }
        };
        if parens {
            self.expect_punct(")")?;
        }
        Ok(filter)
    }

    fn operand(&mut self) -> Result<Operand, DriverError> {
        if matches!(self.peek(), Some(Token::Param)) {
            return self.expect_param().map(Operand::Param);
        }
        if self.eat_word("NULL") {
            return Ok(Operand::Null);
        }
        let negative = self.eat_punct("-");
        match self.next() {
            Some(Token::Num(n)) => {
                let text = if negative { format!("-{}", n) } else { n };
                Ok(Operand::Literal(NativeValue::Bytes(text.into_bytes())))
            }
            Some(Token::Str(s)) if !negative => {
                Ok(Operand::Literal(NativeValue::Bytes(s.into_bytes())))
            }
            Some(Token::Word(w)) if !negative && w.eq_ignore_ascii_case("X") => match self.next() {
                Some(Token::Str(hex)) => decode_hex(&hex)
                    .map(|b| Operand::Literal(NativeValue::Bytes(b)))
                    .ok_or_else(|| syntax_error(&hex)),
                _ => {
                    self.pos -= 1;
                    Err(self.error())
                }
            },
            _ => {
                self.pos -= 1;
                Err(self.error())
            }
        }
    }

    fn insert(&mut self) -> Result<Statement, DriverError> {
        self.expect_word("INTO")?;
        let table = self.table_ref()?;
        self.expect_punct("(")?;
        let columns = self.ident_list()?;
        self.expect_punct(")")?;
        self.expect_word("VALUES")?;
        self.expect_punct("(")?;
        for i in 0..columns.len() {
            if i > 0 {
                self.expect_punct(",")?;
            }
            self.expect_param()?;
        }
        self.expect_punct(")")?;
        Ok(Statement::Insert { table, columns })
    }

    fn update(&mut self) -> Result<Statement, DriverError> {
        let table = self.table_ref()?;
        self.expect_word("SET")?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.ident()?);
            self.expect_punct("=")?;
            self.expect_param()?;
            if !self.eat_punct(",") {
                break;
            }
        }
        let key = self.key_clause()?;
        Ok(Statement::Update {
            table,
            columns,
            key,
        })
    }

    fn delete(&mut self) -> Result<Statement, DriverError> {
        self.expect_word("FROM")?;
        let table = self.table_ref()?;
        let key = self.key_clause()?;
        Ok(Statement::Delete { table, key })
    }

    fn key_clause(&mut self) -> Result<String, DriverError> {
        self.expect_word("WHERE")?;
        let key = self.ident()?;
        self.expect_punct("=")?;
        self.expect_param()?;
        Ok(key)
    }

    fn set(&mut self) -> Result<Statement, DriverError> {
        let mut vars = Vec::new();
        loop {
            let name = match self.next() {
                Some(Token::Word(w)) => w.to_ascii_lowercase(),
                _ => {
                    self.pos -= 1;
                    return Err(self.error());
                }
            };
            self.expect_punct("=")?;
            let value = match self.next() {
                Some(Token::Num(v)) | Some(Token::Str(v)) | Some(Token::Word(v)) => v,
                _ => {
                    self.pos -= 1;
                    return Err(self.error());
                }
            };
            vars.push((name, value));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Statement::Set(vars))
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Parse one statement with backslash escapes on.
pub fn parse(sql: &str) -> Result<Parsed, DriverError> {
    parse_with(sql, true)
}

/// Parse one statement; `backslash_escapes` follows the session `sql_mode`.
pub fn parse_with(sql: &str, backslash_escapes: bool) -> Result<Parsed, DriverError> {
    let tokens = tokenize(sql, backslash_escapes)?;

    let is_size_query = tokens.iter().any(
        |t| matches!(t, Token::Word(w) if w.eq_ignore_ascii_case("information_schema")),
    );
    if is_size_query {
        let strings: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Str(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        return match strings.as_slice() {
            [database, table] => Ok(Parsed {
                statement: Statement::TableSize(TableRef {
                    database: database.clone(),
                    table: table.clone(),
                }),
                param_count: 0,
            }),
            _ => Err(syntax_error(sql)),
        };
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        params: 0,
    };
    let statement = parser.statement()?;
    parser.finish()?;
    Ok(Parsed {
        statement,
        param_count: parser.params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(db: &str, t: &str) -> TableRef {
        TableRef {
            database: db.into(),
            table: t.into(),
        }
    }

    #[test]
    fn test_select_with_filters() {
        let parsed =
            parse("SELECT `id`, `name` FROM `db`.`items` WHERE (`id` >= ?) AND (`name` IS NOT NULL) FOR UPDATE")
                .unwrap();
        assert_eq!(parsed.param_count, 1);
        assert_eq!(
            parsed.statement,
            Statement::Select {
                table: table("db", "items"),
                columns: vec!["id".into(), "name".into()],
                filters: vec![
                    Filter {
                        column: "id".into(),
                        op: CompareOp::Ge,
                        operand: Some(Operand::Param(0)),
                    },
                    Filter {
                        column: "name".into(),
                        op: CompareOp::IsNotNull,
                        operand: None,
                    },
                ],
                for_update: true,
            }
        );
    }

    #[test]
    fn test_literal_operands() {
        let parsed = parse(
            "SELECT `id` FROM `db`.`t` WHERE (`id` > -5) AND (`name` = 'O''Brien\\\\x') AND (`raw` = X'00ff') AND (`id` <> ?)",
        )
        .unwrap();
        assert_eq!(parsed.param_count, 1);
        let Statement::Select { filters, .. } = parsed.statement else {
            panic!("expected SELECT");
        };
        let operands: Vec<_> = filters.into_iter().map(|f| f.operand.unwrap()).collect();
        assert_eq!(
            operands,
            vec![
                Operand::Literal(NativeValue::Bytes(b"-5".to_vec())),
                Operand::Literal(NativeValue::Bytes(b"O'Brien\\x".to_vec())),
                Operand::Literal(NativeValue::Bytes(vec![0x00, 0xff])),
                Operand::Param(0),
            ]
        );
    }

    #[test]
    fn test_modify_statements() {
        let parsed = parse("INSERT INTO `db`.`t`(`a`, `b`) VALUES (?, ?)").unwrap();
        assert_eq!(parsed.param_count, 2);

        let parsed = parse("UPDATE `db`.`t` SET `b` = ?, `c` = ? WHERE `a` = ?").unwrap();
        assert_eq!(parsed.param_count, 3);
        assert!(matches!(parsed.statement, Statement::Update { ref key, .. } if key == "a"));

        let parsed = parse("DELETE FROM `db`.`t` WHERE `a` = ?").unwrap();
        assert_eq!(parsed.param_count, 1);
    }

    #[test]
    fn test_session_and_meta() {
        let parsed = parse("SET sql_mode='TRADITIONAL'").unwrap();
        assert_eq!(
            parsed.statement,
            Statement::Set(vec![("sql_mode".into(), "TRADITIONAL".into())])
        );
        assert_eq!(parse("SHOW WARNINGS").unwrap().statement, Statement::ShowWarnings);
        assert_eq!(
            parse("EXPLAIN `db`.`t`").unwrap().statement,
            Statement::ExplainTable(table("db", "t"))
        );
        assert_eq!(
            parse(
                "SELECT round(((data_length + index_length)), 2) FROM information_schema.TABLES WHERE table_schema = 'db' AND table_name = 'it''s'"
            )
            .unwrap()
            .statement,
            Statement::TableSize(table("db", "it's"))
        );
    }

    #[test]
    fn test_backslash_is_literal_without_escapes() {
        let sql = r"SELECT `a` FROM `db`.`t` WHERE (`a` = 'C:\\tmp\n')";
        let operand = |escapes| {
            let Statement::Select { filters, .. } = parse_with(sql, escapes).unwrap().statement
            else {
                panic!("expected SELECT");
            };
            filters[0].operand.clone()
        };
        assert_eq!(
            operand(true),
            Some(Operand::Literal(NativeValue::Bytes(b"C:\\tmp\n".to_vec())))
        );
        assert_eq!(
            operand(false),
            Some(Operand::Literal(NativeValue::Bytes(br"C:\\tmp\n".to_vec())))
        );
    }

    #[test]
    fn test_syntax_error() {
        let err = parse("SELEKT 1").unwrap_err();
        assert_eq!(err.code, code::ER_PARSE_ERROR);
        assert!(parse("SELECT `a` FROM `db`.`t` WHERE").is_err());
        assert!(parse("SELECT `a FROM t").is_err());
    }
}
