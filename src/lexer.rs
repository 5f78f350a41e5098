use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, one_of},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, tuple},
    IResult,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Shader kinds
    Light,
    Surface,
    Volume,
    Displacement,
    Imager,

    // Types
    Float,
    String,
    Color,
    Point,
    Vector,
    Normal,
    Matrix,
    Void,

    // Storage modifiers
    Uniform,
    Varying,
    Output,
    Extern,

    // Statements
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Return,
    Solar,
    Illuminate,
    Illuminance,

    // Sampling forms
    Texture,
    Environment,
    Shadow,

    // Identifiers and literals; lexemes kept verbatim for the tree
    Identifier(std::string::String),
    Integer(std::string::String),
    Real(std::string::String),
    StringLiteral(std::string::String),

    // Operators
    Dot,
    Caret,
    Star,
    Slash,
    Plus,
    Minus,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    EqualEqual,
    NotEqual,
    AndAnd,
    OrOr,
    Bang,
    Question,
    Colon,
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Semicolon,
    Comma,
}

/// A token together with the 1-based source line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

fn keyword_for(identifier: &str) -> Option<Token> {
    let token = match identifier {
        "light" => Token::Light,
        "surface" => Token::Surface,
        "volume" => Token::Volume,
        "displacement" => Token::Displacement,
        "imager" => Token::Imager,
        "float" => Token::Float,
        "string" => Token::String,
        "color" => Token::Color,
        "point" => Token::Point,
        "vector" => Token::Vector,
        "normal" => Token::Normal,
        "matrix" => Token::Matrix,
        "void" => Token::Void,
        "uniform" => Token::Uniform,
        "varying" => Token::Varying,
        "output" => Token::Output,
        "extern" => Token::Extern,
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "for" => Token::For,
        "break" => Token::Break,
        "continue" => Token::Continue,
        "return" => Token::Return,
        "solar" => Token::Solar,
        "illuminate" => Token::Illuminate,
        "illuminance" => Token::Illuminance,
        "texture" => Token::Texture,
        "environment" => Token::Environment,
        "shadow" => Token::Shadow,
        _ => return None,
    };
    Some(token)
}

fn parse_identifier(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        |s: &str| keyword_for(s).unwrap_or_else(|| Token::Identifier(s.to_string())),
    )(input)
}

fn parse_exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(input)
}

fn parse_real(input: &str) -> IResult<&str, Token> {
    map(
        alt((
            recognize(tuple((digit1, char('.'), digit0, opt(parse_exponent)))),
            recognize(tuple((char('.'), digit1, opt(parse_exponent)))),
            recognize(pair(digit1, parse_exponent)),
        )),
        |s: &str| Token::Real(s.to_string()),
    )(input)
}

fn parse_integer(input: &str) -> IResult<&str, Token> {
    map(digit1, |s: &str| Token::Integer(s.to_string()))(input)
}

/// String literals are scanned verbatim between double quotes; there are no
/// escape sequences in the language.
fn parse_string(input: &str) -> IResult<&str, Token> {
    map(
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        |s: &str| Token::StringLiteral(s.to_string()),
    )(input)
}

fn parse_operator(input: &str) -> IResult<&str, Token> {
    // Two-character operators first so `>=` never lexes as `>` `=`.
    alt((
        alt((
            value(Token::GreaterEqual, tag(">=")),
            value(Token::LessEqual, tag("<=")),
            value(Token::EqualEqual, tag("==")),
            value(Token::NotEqual, tag("!=")),
            value(Token::AndAnd, tag("&&")),
            value(Token::OrOr, tag("||")),
            value(Token::AddAssign, tag("+=")),
            value(Token::SubtractAssign, tag("-=")),
            value(Token::MultiplyAssign, tag("*=")),
            value(Token::DivideAssign, tag("/=")),
        )),
        alt((
            value(Token::Greater, char('>')),
            value(Token::Less, char('<')),
            value(Token::Bang, char('!')),
            value(Token::Question, char('?')),
            value(Token::Colon, char(':')),
            value(Token::Assign, char('=')),
            value(Token::Dot, char('.')),
            value(Token::Caret, char('^')),
            value(Token::Star, char('*')),
            value(Token::Slash, char('/')),
            value(Token::Plus, char('+')),
            value(Token::Minus, char('-')),
        )),
    ))(input)
}

fn parse_delimiter(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::LeftParen, char('(')),
        value(Token::RightParen, char(')')),
        value(Token::LeftBrace, char('{')),
        value(Token::RightBrace, char('}')),
        value(Token::LeftBracket, char('[')),
        value(Token::RightBracket, char(']')),
        value(Token::Semicolon, char(';')),
        value(Token::Comma, char(',')),
    ))(input)
}

fn parse_token(input: &str) -> IResult<&str, Token> {
    alt((
        parse_identifier,
        parse_real,
        parse_integer,
        parse_string,
        parse_operator,
        parse_delimiter,
    ))(input)
}

/// Skip whitespace and comments, returning the rest and the number of lines
/// consumed. Both `//` and `/* */` comment forms are recognized.
fn skip_trivia(mut input: &str) -> (&str, usize) {
    let mut lines = 0;
    loop {
        let trimmed = input.trim_start_matches(|c: char| c.is_whitespace());
        lines += input[..input.len() - trimmed.len()].matches('\n').count();
        input = trimmed;

        if let Some(rest) = input.strip_prefix("//") {
            input = match rest.find('\n') {
                Some(at) => &rest[at..],
                None => "",
            };
        } else if let Some(rest) = input.strip_prefix("/*") {
            match rest.find("*/") {
                Some(at) => {
                    lines += rest[..at].matches('\n').count();
                    input = &rest[at + 2..];
                }
                None => {
                    lines += rest.matches('\n').count();
                    input = "";
                }
            }
        } else {
            return (input, lines);
        }
    }
}

/// Tokenize a shader source, tracking the line each token starts on.
pub fn tokenize(source: &str) -> std::result::Result<Vec<Spanned>, String> {
    let mut remaining = source;
    let mut line = 1;
    let mut tokens = Vec::new();

    loop {
        let (rest, skipped) = skip_trivia(remaining);
        line += skipped;
        remaining = rest;
        if remaining.is_empty() {
            return Ok(tokens);
        }

        match parse_token(remaining) {
            Ok((rest, token)) => {
                tokens.push(Spanned { token, line });
                let consumed = &remaining[..remaining.len() - rest.len()];
                line += consumed.matches('\n').count();
                remaining = rest;
            }
            Err(_) => {
                return Err(format!(
                    "({}): unexpected character '{}'",
                    line,
                    remaining.chars().next().unwrap_or(' ')
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn tokenize_keywords_and_identifiers() {
        assert_eq!(
            kinds("surface wood"),
            vec![Token::Surface, Token::Identifier("wood".to_string())]
        );
    }

    #[test]
    fn tokenize_numbers() {
        assert_eq!(
            kinds("1 2.5 .5 1e3"),
            vec![
                Token::Integer("1".to_string()),
                Token::Real("2.5".to_string()),
                Token::Real(".5".to_string()),
                Token::Real("1e3".to_string()),
            ]
        );
    }

    #[test]
    fn dot_after_call_is_an_operator() {
        assert_eq!(
            kinds("normalize(L).N"),
            vec![
                Token::Identifier("normalize".to_string()),
                Token::LeftParen,
                Token::Identifier("L".to_string()),
                Token::RightParen,
                Token::Dot,
                Token::Identifier("N".to_string()),
            ]
        );
    }

    #[test]
    fn tokenize_string_literal() {
        assert_eq!(
            kinds("point \"world\" (0, 0, 0)"),
            vec![
                Token::Point,
                Token::StringLiteral("world".to_string()),
                Token::LeftParen,
                Token::Integer("0".to_string()),
                Token::Comma,
                Token::Integer("0".to_string()),
                Token::Comma,
                Token::Integer("0".to_string()),
                Token::RightParen,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_lines_tracked() {
        let tokens = tokenize("// heading\n/* block\n comment */ Ci").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token, Token::Identifier("Ci".to_string()));
        assert_eq!(tokens[0].line, 2);
    }

    #[test]
    fn compound_assignment_operators() {
        assert_eq!(
            kinds("x += 1; x *= 2;"),
            vec![
                Token::Identifier("x".to_string()),
                Token::AddAssign,
                Token::Integer("1".to_string()),
                Token::Semicolon,
                Token::Identifier("x".to_string()),
                Token::MultiplyAssign,
                Token::Integer("2".to_string()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn unterminated_source_reports_line() {
        let err = tokenize("surface t() {\n  @\n}").unwrap_err();
        assert!(err.contains("(2)"), "error was: {}", err);
    }
}
