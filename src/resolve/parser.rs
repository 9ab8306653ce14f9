use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alphanumeric1, char, multispace0},
    combinator::{all_consuming, map, recognize, value},
    error::{ContextError, ParseError},
    multi::{many1_count, separated_list1},
    sequence::{delimited, separated_pair},
    IResult, Parser,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorEntry<'a> {
    Wildcard,
    Qualified { namespace: &'a str, name: &'a str },
    Bare(&'a str),
}

fn resource_name<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, &'a str, E> {
    recognize(many1_count(alt((alphanumeric1, tag("-"), tag("."))))).parse(s)
}

fn wildcard<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, SelectorEntry<'a>, E> {
    value(SelectorEntry::Wildcard, char('*')).parse(s)
}

fn qualified<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, SelectorEntry<'a>, E> {
    map(
        separated_pair(resource_name, char('/'), resource_name),
        |(namespace, name)| SelectorEntry::Qualified { namespace, name },
    )
    .parse(s)
}

fn bare<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, SelectorEntry<'a>, E> {
    map(resource_name, SelectorEntry::Bare).parse(s)
}

fn entry<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, SelectorEntry<'a>, E> {
    alt((wildcard, qualified, bare)).parse(s)
}

pub fn parse_selector<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, Vec<SelectorEntry<'a>>, E> {
    all_consuming(separated_list1(
        char(','),
        delimited(multispace0, entry, multispace0),
    ))
    .parse(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::Error;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("kubesphere-router", SelectorEntry::Bare("kubesphere-router"))]
    #[case("demo.v2", SelectorEntry::Bare("demo.v2"))]
    #[case(
        "ns1/gw1",
        SelectorEntry::Qualified { namespace: "ns1", name: "gw1" }
    )]
    #[case("*", SelectorEntry::Wildcard)]
    fn single_entry(#[case] selector: &str, #[case] expected: SelectorEntry) {
        let (remaining, actual) = entry::<Error<_>>(selector).unwrap();

        assert_eq!(actual, expected);
        assert_eq!(remaining, "");
    }

    #[test]
    fn comma_separated_entries() {
        let (remaining, actual) =
            parse_selector::<Error<_>>("ns1/gw1, gw2 ,ns3/gw3").unwrap();

        let expected = vec![
            SelectorEntry::Qualified {
                namespace: "ns1",
                name: "gw1",
            },
            SelectorEntry::Bare("gw2"),
            SelectorEntry::Qualified {
                namespace: "ns3",
                name: "gw3",
            },
        ];

        assert_eq!(actual, expected);
        assert_eq!(remaining, "");
    }

    #[test]
    fn wildcard_mixed_with_names() {
        let (_, actual) = parse_selector::<Error<_>>("gw1,*").unwrap();

        assert_eq!(
            actual,
            vec![SelectorEntry::Bare("gw1"), SelectorEntry::Wildcard]
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("ns1/")]
    #[case("ns1/gw1/extra")]
    #[case("gw1,,gw2")]
    fn parse_error(#[case] selector: &str) {
        let actual = parse_selector::<Error<_>>(selector);

        assert!(actual.is_err());
    }
}
