//! Text form of [`LogicCriteria`]
//!
//! ```text
//! criteria    := [aggregation] token [condition]
//! aggregation := LATEST | EARLIEST | LAST [n] | FIRST [n] | COUNT | EXISTS
//!              | NOTEXISTS | AVERAGE | MAX | MIN | DISTINCT
//! token       := '{' text '}' | words up to the first keyword or operator
//! condition   := conjunction (OR conjunction)*
//! conjunction := unary ([AND] unary)*
//! unary       := NOT unary | '(' [condition] ')' | restriction
//! restriction := AS OF date | BEFORE date | AFTER date | WITHIN duration
//!              | (> | >= | < | <=) number | = value | CONTAINS concept:id
//! value       := 'text' | number | true | false | @date | concept:id
//! ```
//!
//! Keywords are case-insensitive. Dates are `YYYY-MM-DD` or RFC 3339.
//! A group directly after a bare token needs the token in braces.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use medlogic_diagnostics::{EvalResult, LogicError};
use winnow::ascii::{Caseless, alpha1, dec_int, dec_uint, float, multispace0, multispace1};
use winnow::combinator::{alt, delimited, not, opt, preceded, repeat, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::token::{literal, none_of, take_till, take_while};
use winnow::{ModalResult, Parser};

use crate::args::ArgValue;
use crate::criteria::{Aggregation, Condition, DateConstraint, LogicCriteria, ValueFilter};
use crate::duration::{Duration, DurationUnit};

/// Words that end a bare token
const KEYWORDS: &[&str] = &[
    "AS", "BEFORE", "AFTER", "WITHIN", "CONTAINS", "AND", "OR", "NOT",
];

const AGGREGATIONS: &[&str] = &[
    "LATEST", "EARLIEST", "LAST", "FIRST", "COUNT", "EXISTS", "NOTEXISTS", "AVERAGE", "MAX",
    "MIN", "DISTINCT",
];

/// Parse the text form of criteria
pub fn parse_criteria(query: &str) -> EvalResult<LogicCriteria> {
    criteria.parse(query).map_err(|e| {
        LogicError::format(query, format!("criteria (at offset {})", e.offset()))
    })
}

/// Whether `token` has to be written in braces to read back as one token
pub(crate) fn needs_braces(token: &str) -> bool {
    let words: Vec<&str> = token.split_whitespace().collect();
    token.is_empty()
        || words.join(" ") != token
        || token.chars().any(|c| !c.is_whitespace() && is_reserved(c))
        || words.iter().any(|w| is_keyword(w))
        || words
            .first()
            .is_some_and(|w| AGGREGATIONS.iter().any(|a| a.eq_ignore_ascii_case(w)))
}

fn is_reserved(c: char) -> bool {
    c.is_whitespace() || matches!(c, '{' | '}' | '<' | '>' | '=')
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn keyword<'i>(word: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    terminated(literal(Caseless(word)), not(take_while(1, is_word_char)))
}

fn criteria(input: &mut &str) -> ModalResult<LogicCriteria> {
    let _ = multispace0.parse_next(input)?;
    let (aggregation, token) = alt((
        (terminated(aggregation, multispace1), token).map(|(a, t)| (Some(a), t)),
        token.map(|t| (None, t)),
    ))
    .parse_next(input)?;
    let condition = opt(condition).parse_next(input)?;
    let _ = multispace0.parse_next(input)?;

    let mut criteria = LogicCriteria::new(token).with_condition(condition.unwrap_or_default());
    if let Some(aggregation) = aggregation {
        criteria = criteria.with_aggregation(aggregation);
    }
    Ok(criteria)
}

fn aggregation(input: &mut &str) -> ModalResult<Aggregation> {
    alt((
        preceded((keyword("LAST"), multispace1), count).map(Aggregation::Last),
        preceded((keyword("FIRST"), multispace1), count).map(Aggregation::First),
        keyword("LATEST").value(Aggregation::Latest),
        keyword("LAST").value(Aggregation::Latest),
        keyword("EARLIEST").value(Aggregation::Earliest),
        keyword("FIRST").value(Aggregation::Earliest),
        keyword("COUNT").value(Aggregation::Count),
        keyword("EXISTS").value(Aggregation::Exists),
        keyword("NOTEXISTS").value(Aggregation::NotExists),
        keyword("AVERAGE").value(Aggregation::Average),
        keyword("MAX").value(Aggregation::Max),
        keyword("MIN").value(Aggregation::Min),
        keyword("DISTINCT").value(Aggregation::Distinct),
    ))
    .parse_next(input)
}

fn count(input: &mut &str) -> ModalResult<usize> {
    terminated(dec_uint, not(take_while(1, is_word_char))).parse_next(input)
}

fn token(input: &mut &str) -> ModalResult<String> {
    alt((braced_token, bare_token)).parse_next(input)
}

fn braced_token(input: &mut &str) -> ModalResult<String> {
    delimited('{', take_till(0.., '}'), '}')
        .map(|s: &str| s.to_string())
        .parse_next(input)
}

fn bare_token(input: &mut &str) -> ModalResult<String> {
    repeat::<_, _, (), _, _>(1.., bare_word)
        .take()
        .map(|s: &str| s.trim().to_string())
        .parse_next(input)
}

fn bare_word(input: &mut &str) -> ModalResult<()> {
    (
        multispace0,
        take_till(1.., is_reserved).verify(|word: &str| !is_keyword(word)),
    )
        .void()
        .parse_next(input)
}

fn condition(input: &mut &str) -> ModalResult<Condition> {
    let first = conjunction.parse_next(input)?;
    let rest: Vec<Condition> =
        repeat(0.., preceded((multispace0, keyword("OR")), conjunction)).parse_next(input)?;
    Ok(Condition::any(std::iter::once(first).chain(rest)))
}

fn conjunction(input: &mut &str) -> ModalResult<Condition> {
    let items: Vec<Condition> =
        repeat(1.., preceded(opt((multispace0, keyword("AND"))), unary)).parse_next(input)?;
    Ok(Condition::all(items))
}

fn unary(input: &mut &str) -> ModalResult<Condition> {
    let _ = multispace0.parse_next(input)?;
    alt((
        preceded((keyword("NOT"), multispace0), unary).map(Condition::negate),
        delimited(('(', multispace0), opt(condition), (multispace0, ')'))
            .map(Option::unwrap_or_default),
        restriction,
    ))
    .parse_next(input)
}

fn restriction(input: &mut &str) -> ModalResult<Condition> {
    let date_constraint = alt((
        preceded((keyword("AS"), multispace1, keyword("OF"), multispace1), date)
            .map(DateConstraint::AsOf),
        preceded((keyword("BEFORE"), multispace1), date).map(DateConstraint::Before),
        preceded((keyword("AFTER"), multispace1), date).map(DateConstraint::After),
        preceded((keyword("WITHIN"), multispace1), duration).map(DateConstraint::Within),
    ))
    .map(Condition::Date);

    let value_filter = alt((
        preceded(
            (keyword("CONTAINS"), multispace0, literal(Caseless("concept:"))),
            dec_int,
        )
        .map(ValueFilter::Contains),
        preceded((">=", multispace0), number).map(ValueFilter::Gte),
        preceded((">", multispace0), number).map(ValueFilter::Gt),
        preceded(("<=", multispace0), number).map(ValueFilter::Lte),
        preceded(("<", multispace0), number).map(ValueFilter::Lt),
        preceded(("=", multispace0), value).map(ValueFilter::Equals),
    ))
    .map(Condition::Value);

    alt((date_constraint, value_filter)).parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<f64> {
    float.parse_next(input)
}

fn duration(input: &mut &str) -> ModalResult<Duration> {
    (number, multispace1, alpha1)
        .verify_map(|(value, _, unit): (f64, &str, &str)| {
            unit.parse::<DurationUnit>()
                .ok()
                .map(|units| Duration::new(value, units))
        })
        .parse_next(input)
}

fn date(input: &mut &str) -> ModalResult<DateTime<Utc>> {
    take_till(1.., |c: char| c.is_whitespace() || c == ')')
        .verify_map(parse_date)
        .parse_next(input)
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN).and_utc())
        })
        .ok()
}

fn value(input: &mut &str) -> ModalResult<ArgValue> {
    alt((
        quoted.map(ArgValue::Text),
        preceded(literal(Caseless("concept:")), dec_int).map(ArgValue::Concept),
        preceded('@', date).map(ArgValue::Date),
        keyword("TRUE").value(ArgValue::Boolean(true)),
        keyword("FALSE").value(ArgValue::Boolean(false)),
        take_while(1.., |c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
            .verify_map(numeric_value),
    ))
    .parse_next(input)
}

/// Integers stay integers; anything with a fraction or exponent is a number
fn numeric_value(text: &str) -> Option<ArgValue> {
    if text.contains(['.', 'e', 'E']) {
        text.parse().ok().map(ArgValue::Number)
    } else {
        text.parse().ok().map(ArgValue::Integer)
    }
}

/// Single-quoted text; `''` stands for one quote
fn quoted(input: &mut &str) -> ModalResult<String> {
    delimited(
        '\'',
        repeat(0.., alt(("''".value('\''), none_of('\'')))),
        '\'',
    )
    .parse_next(input)
}
