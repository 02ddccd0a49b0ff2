use std::mem;

use thiserror::Error;

use crate::{
    lexer::{LexError, Lexer, Position},
    syntax::{BinOp, Expr, Query, SortDirection, Statement, Token, UnaryOp},
};

/// Errors produced while parsing query text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("expected {expected}, got {found:?} at {position}")]
    Expected {
        expected: String,
        found: Token,
        position: Position,
    },

    #[error("unexpected token {found:?} at {position}")]
    Unexpected { found: Token, position: Position },

    #[error("bare identifier '{0}' must be part of an access path (`$.{0}`) or an enum constant (`Type.{0}`)")]
    BareIdentifier(String),

    #[error("unknown stage keyword '{0}'")]
    UnknownStage(String),
}

pub struct Parser {
    lexer: Lexer,
    current_token: Token,
    token_start: Position,
}

impl Parser {
    pub fn new(mut lexer: Lexer) -> Result<Self, ParseError> {
        lexer.skip_whitespace();
        let token_start = lexer.position();
        let current_token = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current_token,
            token_start,
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.lexer.skip_whitespace();
        self.token_start = self.lexer.position();
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if !self.check(&expected) {
            return Err(ParseError::Expected {
                expected: format!("{:?}", expected),
                found: self.current_token.clone(),
                position: self.token_start,
            });
        }
        self.advance()
    }

    fn check(&self, token: &Token) -> bool {
        mem::discriminant(&self.current_token) == mem::discriminant(token)
    }

    fn unexpected(&self) -> ParseError {
        ParseError::Unexpected {
            found: self.current_token.clone(),
            position: self.token_start,
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String, ParseError> {
        match &self.current_token {
            Token::Identifier(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            _ => Err(ParseError::Expected {
                expected: what.to_string(),
                found: self.current_token.clone(),
                position: self.token_start,
            }),
        }
    }

    /// Parse primary expressions (atoms): literals, `$`, `@`, parameters,
    /// enum constants, parenthesized expressions and literal collections.
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.token_start;
        let expr = match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Float(n) => Expr::Float(n),
            Token::Integer(n) => Expr::Integer(n),
            Token::String(s) => Expr::String(s),
            Token::Boolean(b) => Expr::Boolean(b),
            Token::Null => Expr::Null,
            Token::Dollar => Expr::Root,
            Token::At => Expr::LambdaParam,
            Token::Param(name) => Expr::Param(name),

            Token::Identifier(ty) => {
                self.advance()?;
                if !self.check(&Token::Dot) {
                    return Err(ParseError::BareIdentifier(ty));
                }
                self.advance()?;
                let member = self.expect_identifier("enum member after '.'")?;
                return Ok(Expr::EnumConstant { ty, member });
            }

            Token::LParen => {
                self.advance()?;
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                return Ok(expr);
            }
            Token::LBrace => {
                self.advance()?;
                return self.parse_object_literal();
            }
            Token::LBracket => {
                self.advance()?;
                return self.parse_array_literal();
            }

            found => return Err(ParseError::Unexpected { found, position }),
        };
        self.advance()?;
        Ok(expr)
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        Ok(Expr::Object(self.parse_object_pairs()?))
    }

    fn parse_object_pairs(&mut self) -> Result<Vec<(String, Expr)>, ParseError> {
        let mut pairs = vec![];

        while !self.check(&Token::RBrace) {
            let key = match &self.current_token {
                Token::String(s) => s.clone(),
                Token::Identifier(s) => s.clone(),
                _ => {
                    return Err(ParseError::Expected {
                        expected: "string or identifier as object key".to_string(),
                        found: self.current_token.clone(),
                        position: self.token_start,
                    });
                }
            };

            self.advance()?;
            self.expect(Token::Colon)?;

            let value = self.parse_expression()?;
            pairs.push((key, value));

            if !self.check(&Token::RBrace) {
                self.expect(Token::Comma)?;
            }
        }

        self.expect(Token::RBrace)?;
        Ok(pairs)
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ParseError> {
        let mut elements = vec![];

        while !self.check(&Token::RBracket) {
            elements.push(self.parse_expression()?);

            if !self.check(&Token::RBracket) {
                self.expect(Token::Comma)?;
            }
        }

        self.expect(Token::RBracket)?;
        Ok(Expr::Array(elements))
    }

    fn parse_call_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = vec![];
        while !self.check(&Token::RParen) {
            args.push(self.parse_expression()?);
            if !self.check(&Token::RParen) {
                self.expect(Token::Comma)?;
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// Parse access chains: `[key]`, `.name` and `.method(args)`
    fn parse_access(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(&Token::LBracket) {
                self.advance()?;
                let key = self.parse_access_key()?;
                self.expect(Token::RBracket)?;

                expr = Expr::Access {
                    object: Box::new(expr),
                    key: Box::new(key),
                };
            } else if self.check(&Token::Dot) {
                self.advance()?;
                let name = self.expect_identifier("identifier after '.'")?;

                if self.check(&Token::LParen) {
                    self.advance()?;
                    let args = self.parse_call_arguments()?;
                    expr = Expr::MethodCall {
                        object: Box::new(expr),
                        method: name,
                        args,
                    };
                } else {
                    expr = Expr::Access {
                        object: Box::new(expr),
                        key: Box::new(Expr::Key(name)),
                    };
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_access_key(&mut self) -> Result<Expr, ParseError> {
        // Inside brackets:
        // 1. Identifier -> Key (simple field name)
        // 2. String -> Key (field name with special chars)
        // 3. Anything else -> expression (array index)
        match &self.current_token {
            Token::Identifier(name) | Token::String(name) => {
                let key = Expr::Key(name.clone());
                self.advance()?;
                Ok(key)
            }
            _ => self.parse_expression(),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match &self.current_token {
            Token::Not => UnaryOp::Not,
            Token::Minus => UnaryOp::Negate,
            _ => return self.parse_access(),
        };
        self.advance()?;
        let operand = self.parse_unary()?;

        // Fold negative literals so `-1` stays a literal
        Ok(match (op, operand) {
            (UnaryOp::Negate, Expr::Integer(n)) => Expr::Integer(-n),
            (UnaryOp::Negate, Expr::Float(n)) => Expr::Float(-n),
            (op, operand) => Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            },
        })
    }

    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ParseError>,
        op_for: fn(&Token) -> Option<BinOp>,
    ) -> Result<Expr, ParseError> {
        let mut left = next(self)?;

        while let Some(op) = op_for(&self.current_token) {
            self.advance()?;
            let right = next(self)?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_unary, |token| match token {
            Token::Star => Some(BinOp::Multiply),
            Token::Slash => Some(BinOp::Divide),
            Token::Percent => Some(BinOp::Modulo),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_multiplicative, |token| match token {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Subtract),
            _ => None,
        })
    }

    fn parse_bit_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_additive, |token| match token {
            Token::Ampersand => Some(BinOp::BitAnd),
            _ => None,
        })
    }

    fn parse_bit_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_bit_and, |token| match token {
            Token::Bar => Some(BinOp::BitOr),
            _ => None,
        })
    }

    fn parse_coalesce(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_bit_or, |token| match token {
            Token::QuestionQuestion => Some(BinOp::NullCoalesce),
            _ => None,
        })
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_coalesce()?;

        let op = match &self.current_token {
            Token::EqEq => BinOp::Equal,
            Token::NotEq => BinOp::NotEqual,
            Token::Lt => BinOp::LessThan,
            Token::Gt => BinOp::GreaterThan,
            Token::LtEq => BinOp::LessEqual,
            Token::GtEq => BinOp::GreaterEqual,
            _ => return Ok(left),
        };
        self.advance()?;
        let right = self.parse_coalesce()?;
        Ok(Expr::binary(op, left, right))
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_comparison, |token| match token {
            Token::And => Some(BinOp::And),
            _ => None,
        })
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_and, |token| match token {
            Token::Or => Some(BinOp::Or),
            _ => None,
        })
    }

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    /// Parse a standalone expression that must consume the whole input.
    pub fn parse(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expression()?;
        self.expect(Token::Eof)?;
        Ok(expr)
    }
}

impl Parser {
    /// Parse a complete query
    pub fn parse_query(&mut self) -> Result<Query, ParseError> {
        let mut statements = vec![];

        self.expect(Token::Dollar)?;
        while self.check(&Token::Pipe) {
            self.advance()?;
            statements.push(self.parse_statement()?);
        }

        self.expect(Token::Eof)?;

        Ok(Query { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match &self.current_token {
            Token::Question => self.parse_filter(),
            Token::Tilde => self.parse_transform(),
            Token::Exclamation => self.parse_output(),
            Token::Identifier(keyword) => {
                let keyword = keyword.clone();
                self.advance()?;
                self.expect(Token::LParen)?;
                let statement = self.parse_keyword_stage(&keyword)?;
                self.expect(Token::RParen)?;
                Ok(statement)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_filter(&mut self) -> Result<Statement, ParseError> {
        self.advance()?; // consume ?
        self.expect(Token::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(Token::RParen)?;
        Ok(Statement::Filter(condition))
    }

    fn parse_transform(&mut self) -> Result<Statement, ParseError> {
        self.advance()?; // consume ~
        self.expect(Token::LParen)?;

        let mut assignments = vec![];
        loop {
            // Target must be an access path; validated during translation
            let target = self.parse_access()?;
            self.expect(Token::ColonEqual)?;

            let value = if self.check(&Token::Question) {
                self.advance()?;
                self.expect(Token::LParen)?;
                let condition = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Expr::Filter(Box::new(condition))
            } else {
                self.parse_expression()?
            };
            assignments.push((target, value));

            if self.check(&Token::Comma) {
                self.advance()?;
            } else {
                break;
            }
        }

        self.expect(Token::RParen)?;
        Ok(Statement::Transform(assignments))
    }

    fn parse_output(&mut self) -> Result<Statement, ParseError> {
        self.advance()?; // consume !
        self.expect(Token::LParen)?;
        let expr = self.parse_expression()?;
        self.expect(Token::RParen)?;
        Ok(Statement::Output(expr))
    }

    fn parse_integer_argument(&mut self) -> Result<i64, ParseError> {
        match self.current_token {
            Token::Integer(n) => {
                self.advance()?;
                Ok(n)
            }
            Token::Minus => {
                self.advance()?;
                match self.current_token {
                    Token::Integer(n) => {
                        self.advance()?;
                        Ok(-n)
                    }
                    _ => Err(self.unexpected()),
                }
            }
            _ => Err(ParseError::Expected {
                expected: "integer".to_string(),
                found: self.current_token.clone(),
                position: self.token_start,
            }),
        }
    }

    fn parse_keyword_stage(&mut self, keyword: &str) -> Result<Statement, ParseError> {
        match keyword {
            "skip" => Ok(Statement::Skip(self.parse_integer_argument()?)),
            "limit" => Ok(Statement::Limit(self.parse_integer_argument()?)),
            "unwind" => {
                let path = self.parse_access()?;
                let mut preserve_null_and_empty_arrays = false;
                if self.check(&Token::Comma) {
                    self.advance()?;
                    match self.current_token {
                        Token::Boolean(preserve) => {
                            preserve_null_and_empty_arrays = preserve;
                            self.advance()?;
                        }
                        _ => {
                            return Err(ParseError::Expected {
                                expected: "boolean".to_string(),
                                found: self.current_token.clone(),
                                position: self.token_start,
                            });
                        }
                    }
                }
                Ok(Statement::Unwind {
                    path,
                    preserve_null_and_empty_arrays,
                })
            }
            "count" => match mem::replace(&mut self.current_token, Token::Eof) {
                Token::String(name) => {
                    self.advance()?;
                    Ok(Statement::Count(name))
                }
                found => Err(ParseError::Expected {
                    expected: "output field name string".to_string(),
                    found,
                    position: self.token_start,
                }),
            },
            "sort" => {
                let mut keys = vec![];
                while !self.check(&Token::RParen) {
                    let key = self.parse_access()?;
                    let direction = match &self.current_token {
                        Token::Identifier(word) if word == "desc" => {
                            self.advance()?;
                            SortDirection::Descending
                        }
                        Token::Identifier(word) if word == "asc" => {
                            self.advance()?;
                            SortDirection::Ascending
                        }
                        _ => SortDirection::Ascending,
                    };
                    keys.push((key, direction));
                    if !self.check(&Token::RParen) {
                        self.expect(Token::Comma)?;
                    }
                }
                Ok(Statement::Sort(keys))
            }
            "group" => {
                let key = self.parse_expression()?;
                self.expect(Token::Comma)?;
                self.expect(Token::LBrace)?;
                let accumulators = self.parse_object_pairs()?;
                Ok(Statement::Group { key, accumulators })
            }
            other => Err(ParseError::UnknownStage(other.to_string())),
        }
    }
}

/// Parse a standalone expression.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    Parser::new(Lexer::new(source))?.parse()
}

/// Parse a `$ |> ...` query.
pub fn parse_query(source: &str) -> Result<Query, ParseError> {
    Parser::new(Lexer::new(source))?.parse_query()
}

/// A source text is a pipeline query when it chains statements with `|>`;
/// anything else is a standalone filter expression.
pub fn is_pipeline_query(source: &str) -> bool {
    source.trim_start().starts_with('$') && source.contains("|>")
}
