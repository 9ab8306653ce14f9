use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{anychar, char, i64, multispace0, multispace1},
    combinator::{all_consuming, map, not, opt, recognize},
    error::{ContextError, ParseError},
    multi::{many0, many1_count, separated_list1},
    sequence::{delimited, preceded, separated_pair},
    IResult, Parser,
};

/// A function applied to a placeholder, either as a prefix
/// (`{{ toYaml foo }}`) or through a pipe (`... | nindent 4`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncCall<'a> {
    pub name: &'a str,
    pub arg: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Expr {
        path: Vec<&'a str>,
        calls: Vec<FuncCall<'a>>,
    },
}

fn ident<'a, E>(s: &'a str) -> IResult<&'a str, &'a str, E>
where
    E: ParseError<&'a str> + ContextError<&'a str>,
{
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(s)
}

fn path<'a, E>(s: &'a str) -> IResult<&'a str, Vec<&'a str>, E>
where
    E: ParseError<&'a str> + ContextError<&'a str>,
{
    separated_list1(char('.'), ident).parse(s)
}

fn pipe_call<'a, E>(s: &'a str) -> IResult<&'a str, FuncCall<'a>, E>
where
    E: ParseError<&'a str> + ContextError<&'a str>,
{
    map(
        preceded(
            (multispace0, char('|'), multispace0),
            (ident, opt(preceded(multispace1, i64))),
        ),
        |(name, arg)| FuncCall { name, arg },
    )
    .parse(s)
}

fn expr_body<'a, E>(s: &'a str) -> IResult<&'a str, Segment<'a>, E>
where
    E: ParseError<&'a str> + ContextError<&'a str>,
{
    let prefix_call = map(
        separated_pair(ident, multispace1, path),
        |(name, path)| (path, vec![FuncCall { name, arg: None }]),
    );

    let bare = map(path, |path| (path, Vec::new()));

    map(
        ((alt((prefix_call, bare))), many0(pipe_call)),
        |((path, mut calls), piped)| {
            calls.extend(piped);
            Segment::Expr { path, calls }
        },
    )
    .parse(s)
}

fn expr<'a, E>(s: &'a str) -> IResult<&'a str, Segment<'a>, E>
where
    E: ParseError<&'a str> + ContextError<&'a str>,
{
    delimited(
        (tag("{{"), multispace0),
        expr_body,
        (multispace0, tag("}}")),
    )
    .parse(s)
}

fn text<'a, E>(s: &'a str) -> IResult<&'a str, Segment<'a>, E>
where
    E: ParseError<&'a str> + ContextError<&'a str>,
{
    map(
        recognize(many1_count(preceded(not(tag("{{")), anychar))),
        Segment::Text,
    )
    .parse(s)
}

pub fn parse_template<'a, E>(s: &'a str) -> IResult<&'a str, Vec<Segment<'a>>, E>
where
    E: ParseError<&'a str> + ContextError<&'a str>,
{
    all_consuming(many0(alt((expr, text)))).parse(s)
}
