use std::str::FromStr;

use expand_core::DistributionPolicy;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, tag_no_case};
use nom::character::complete::{alpha1, alphanumeric1, char, digit1, one_of};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, value};
use nom::error::context;
use nom::multi::{fold_many0, many0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Hash(Vec<String>),
    Random,
    Replicated,
}

impl Distribution {
    pub fn into_policy(self, num_segments: u32) -> DistributionPolicy {
        match self {
            Distribution::Hash(keys) => DistributionPolicy::hash(keys, num_segments),
            Distribution::Random => DistributionPolicy::random(num_segments),
            Distribution::Replicated => DistributionPolicy::replicated(num_segments),
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct StmtCreateTable {
    pub name: String,
    pub partitioned: bool,
    pub policy: Distribution,
}

/// A partition inherits the distribution of its parent.
#[derive(Debug, PartialEq)]
pub struct StmtCreatePartition {
    pub name: String,
    pub parent: String,
    pub partitioned: bool,
}

#[derive(Debug, PartialEq)]
pub struct StmtDropTable {
    pub name: String,
}

#[derive(Debug, PartialEq)]
pub struct StmtSetSegments {
    pub segment_count: u32,
}

#[derive(Debug, PartialEq)]
pub struct StmtPrepare {
    pub root: String,
}

#[derive(Debug, PartialEq)]
pub struct StmtRedistribute {
    pub partition: String,
    pub root: String,
}

#[derive(Debug, PartialEq)]
pub struct StmtExpand {
    pub root: String,
}

#[derive(Debug, PartialEq)]
pub struct StmtShow {
    pub root: String,
}

#[derive(Debug, PartialEq)]
pub enum Stmt {
    CreateTable(StmtCreateTable),
    CreatePartition(StmtCreatePartition),
    DropTable(StmtDropTable),
    SetSegments(StmtSetSegments),
    Prepare(StmtPrepare),
    Redistribute(StmtRedistribute),
    Expand(StmtExpand),
    Show(StmtShow),
}

fn sp(input: &str) -> IResult<&str, ()> {
    fold_many0(value((), one_of(" \t\n\r")), (), |_, _| ())(input)
}

fn ident(input: &str) -> IResult<&str, &str> {
    context(
        "ident",
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
    )(input)
}

fn quoted(input: &str) -> IResult<&str, String> {
    context(
        "quoted",
        map(delimited(char('"'), is_not("\""), char('"')), |s: &str| {
            s.to_string()
        }),
    )(input)
}

fn name(input: &str) -> IResult<&str, String> {
    context(
        "name",
        alt((
            quoted,
            map(
                recognize(pair(ident, many0(pair(char('.'), ident)))),
                ToString::to_string,
            ),
        )),
    )(input)
}

fn segment_count(input: &str) -> IResult<&str, u32> {
    context("segment_count", map_res(digit1, u32::from_str))(input)
}

fn policy(input: &str) -> IResult<&str, Distribution> {
    let keys = delimited(
        char('('),
        separated_list1(char(','), delimited(sp, name, sp)),
        char(')'),
    );

    context(
        "policy",
        preceded(
            tuple((tag_no_case("distributed"), sp)),
            alt((
                map(
                    tuple((tag_no_case("by"), sp, keys)),
                    |(_, _, keys)| Distribution::Hash(keys),
                ),
                value(Distribution::Random, tag_no_case("randomly")),
                value(Distribution::Replicated, tag_no_case("replicated")),
            )),
        ),
    )(input)
}

fn stmt_create_table(input: &str) -> IResult<&str, StmtCreateTable> {
    context(
        "stmt_create_table",
        map(
            tuple((
                tag_no_case("create"),
                sp,
                tag_no_case("table"),
                sp,
                name,
                sp,
                opt(terminated(tag_no_case("partitioned"), sp)),
                policy,
            )),
            |(_, _, _, _, name, _, partitioned, policy)| StmtCreateTable {
                name,
                partitioned: partitioned.is_some(),
                policy,
            },
        ),
    )(input)
}

fn stmt_create_partition(input: &str) -> IResult<&str, StmtCreatePartition> {
    context(
        "stmt_create_partition",
        map(
            tuple((
                tag_no_case("create"),
                sp,
                tag_no_case("partition"),
                sp,
                name,
                sp,
                tag_no_case("of"),
                sp,
                name,
                opt(preceded(sp, tag_no_case("partitioned"))),
            )),
            |(_, _, _, _, name, _, _, _, parent, partitioned)| StmtCreatePartition {
                name,
                parent,
                partitioned: partitioned.is_some(),
            },
        ),
    )(input)
}

fn stmt_drop_table(input: &str) -> IResult<&str, StmtDropTable> {
    context(
        "stmt_drop_table",
        map(
            tuple((tag_no_case("drop"), sp, tag_no_case("table"), sp, name)),
            |(_, _, _, _, name)| StmtDropTable { name },
        ),
    )(input)
}

fn stmt_set_segments(input: &str) -> IResult<&str, StmtSetSegments> {
    context(
        "stmt_set_segments",
        map(
            tuple((
                tag_no_case("set"),
                sp,
                tag_no_case("segments"),
                sp,
                segment_count,
            )),
            |(_, _, _, _, segment_count)| StmtSetSegments { segment_count },
        ),
    )(input)
}

fn stmt_prepare(input: &str) -> IResult<&str, StmtPrepare> {
    context(
        "stmt_prepare",
        map(tuple((tag_no_case("prepare"), sp, name)), |(_, _, root)| {
            StmtPrepare { root }
        }),
    )(input)
}

fn stmt_redistribute(input: &str) -> IResult<&str, StmtRedistribute> {
    context(
        "stmt_redistribute",
        map(
            tuple((
                tag_no_case("redistribute"),
                sp,
                name,
                sp,
                tag_no_case("of"),
                sp,
                name,
            )),
            |(_, _, partition, _, _, _, root)| StmtRedistribute { partition, root },
        ),
    )(input)
}

fn stmt_expand(input: &str) -> IResult<&str, StmtExpand> {
    context(
        "stmt_expand",
        map(tuple((tag_no_case("expand"), sp, name)), |(_, _, root)| {
            StmtExpand { root }
        }),
    )(input)
}

fn stmt_show(input: &str) -> IResult<&str, StmtShow> {
    context(
        "stmt_show",
        map(tuple((tag_no_case("show"), sp, name)), |(_, _, root)| {
            StmtShow { root }
        }),
    )(input)
}

pub fn stmt(input: &str) -> IResult<&str, Stmt> {
    context(
        "stmt",
        all_consuming(terminated(
            alt((
                map(delimited(sp, stmt_create_table, sp), Stmt::CreateTable),
                map(delimited(sp, stmt_create_partition, sp), Stmt::CreatePartition),
                map(delimited(sp, stmt_drop_table, sp), Stmt::DropTable),
                map(delimited(sp, stmt_set_segments, sp), Stmt::SetSegments),
                map(delimited(sp, stmt_prepare, sp), Stmt::Prepare),
                map(delimited(sp, stmt_redistribute, sp), Stmt::Redistribute),
                map(delimited(sp, stmt_expand, sp), Stmt::Expand),
                map(delimited(sp, stmt_show, sp), Stmt::Show),
            )),
            opt(pair(char(';'), sp)),
        )),
    )(input)
}
