use std::iter::Peekable;
use std::str::Chars;

use crate::config::tokens::{Loc, Token, TokenType};

/// Turns the NGINX-like configuration text into a flat token stream. Braces
/// and semicolons carry all the structure; whitespace and `#` comments are
/// insignificant outside quoted strings.
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.next();
        if let Some(c) = c {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn peek(&mut self) -> Option<&char> {
        self.input.peek()
    }

    fn current_loc(&self) -> Loc {
        Loc {
            line: self.line,
            col: self.col,
        }
    }

    fn skip_comment(&mut self) {
        while let Some(&c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_quoted_string(&mut self, quote: char) -> Result<String, String> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => return Ok(s),
                Some(c) => s.push(c),
                None => return Err(format!("unterminated string starting with {quote}")),
            }
        }
    }

    fn read_ident_or_number(&mut self) -> TokenType {
        let mut s = String::new();
        while let Some(&c) = self.peek() {
            if c.is_whitespace() || matches!(c, ';' | '{' | '}' | '#') {
                break;
            }
            s.push(c);
            self.advance();
        }
        if let Ok(n) = s.parse::<u64>() {
            TokenType::Number(n)
        } else {
            TokenType::Ident(s)
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();

        loop {
            while let Some(&c) = self.peek() {
                if c.is_whitespace() {
                    self.advance();
                } else {
                    break;
                }
            }

            let Some(&c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenType::Eof,
                    loc: self.current_loc(),
                });
                break;
            };

            if c == '#' {
                self.skip_comment();
                continue;
            }

            let loc = self.current_loc();
            match c {
                ';' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenType::Semicolon,
                        loc,
                    });
                }
                '{' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenType::LBrace,
                        loc,
                    });
                }
                '}' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenType::RBrace,
                        loc,
                    });
                }
                '"' | '\'' => {
                    let s = self.read_quoted_string(c)?;
                    tokens.push(Token {
                        kind: TokenType::StringLit(s),
                        loc,
                    });
                }
                _ => {
                    let kind = self.read_ident_or_number();
                    tokens.push(Token { kind, loc });
                }
            }
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_listen_directive() {
        let mut lexer = Lexer::new("listen 8080;\n");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(
            tokens.iter().map(|t| &t.kind).collect::<Vec<_>>(),
            vec![
                &TokenType::Ident("listen".into()),
                &TokenType::Number(8080),
                &TokenType::Semicolon,
                &TokenType::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments() {
        let mut lexer = Lexer::new("# comment\nroot ./www; # trailing\n");
        let tokens = lexer.tokenize().unwrap();
        let kinds: Vec<&TokenType> = tokens.iter().map(|t| &t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &TokenType::Ident("root".into()),
                &TokenType::Ident("./www".into()),
                &TokenType::Semicolon,
                &TokenType::Eof,
            ]
        );
    }

    #[test]
    fn nested_braces() {
        let mut lexer = Lexer::new("server { location /a { allowed_methods GET; } }");
        let tokens = lexer.tokenize().unwrap();
        let opens = tokens.iter().filter(|t| t.kind == TokenType::LBrace).count();
        let closes = tokens.iter().filter(|t| t.kind == TokenType::RBrace).count();
        assert_eq!(opens, 2);
        assert_eq!(closes, 2);
    }

    #[test]
    fn quoted_string_with_spaces() {
        let mut lexer = Lexer::new(r#"server_name "my server";"#);
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenType::StringLit("my server".into()));
    }
}
