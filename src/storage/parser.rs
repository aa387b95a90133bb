// SQL Parser
// Converts SQL text into the statements the in-memory engine executes.
// `?` placeholders become numbered parameter operands that are resolved
// against the bound parameter slots at execution time.

use super::{Column, DataType, Schema, Value};
use anyhow::{anyhow, bail, Result};
use sqlparser::ast::{
    BinaryOperator, DataType as SqlDataType, Expr, FromTable, ObjectName, ObjectType,
    SelectItem, SetExpr, Statement as SqlStatement, TableFactor, UnaryOperator,
    Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// A statement the engine knows how to execute
#[derive(Debug, Clone)]
pub enum Statement {
    /// CREATE TABLE [IF NOT EXISTS] name (col TYPE, ...)
    CreateTable {
        name: String,
        schema: Schema,
        if_not_exists: bool,
    },
    /// DROP TABLE [IF EXISTS] name
    DropTable { name: String, if_exists: bool },
    /// INSERT INTO name [(cols)] VALUES (...), (...)
    Insert {
        table_name: String,
        columns: Vec<String>,
        rows: Vec<Vec<Operand>>,
    },
    /// SELECT * | cols FROM name [WHERE ...] [LIMIT x] [OFFSET y]
    Select(Select),
    /// DELETE FROM name [WHERE ...]
    Delete {
        table_name: String,
        filter: Option<Predicate>,
    },
}

#[derive(Debug, Clone)]
pub struct Select {
    pub table_name: String,
    /// None means `*`
    pub projection: Option<Vec<String>>,
    pub filter: Option<Predicate>,
    pub limit: Option<Operand>,
    pub offset: Option<Operand>,
}

/// Either a literal or a reference to a bound parameter slot
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Parameter(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// The operator to use when the operands are swapped (`? < col` becomes `col > ?`)
    fn flipped(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            op => op,
        }
    }
}

/// WHERE clause tree
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        operand: Operand,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

/// A parsed statement plus the number of parameter slots it expects
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub statement: Statement,
    pub parameter_count: usize,
}

/// Parses one SQL statement, numbering placeholders as it goes
pub struct StatementParser {
    next_parameter: usize,
    parameter_count: usize,
    /// `OFFSET x LIMIT y` or `LIMIT x, y`
    offset_before_limit: bool,
}

impl StatementParser {
    /// Parse a single SQL statement
    pub fn parse(sql: &str) -> Result<ParsedStatement> {
        let dialect = GenericDialect {};
        let ast = Parser::parse_sql(&dialect, sql)
            .map_err(|e| anyhow!("SQL parsing error: {}", e))?;

        if ast.len() != 1 {
            bail!("Only single statements are supported, got {}", ast.len());
        }

        let mut parser = StatementParser {
            next_parameter: 0,
            parameter_count: 0,
            offset_before_limit: offset_before_limit(&dialect, sql)?,
        };
        let statement = parser.parse_statement(&ast[0])?;

        Ok(ParsedStatement {
            statement,
            parameter_count: parser.parameter_count,
        })
    }

    fn parse_statement(&mut self, statement: &SqlStatement) -> Result<Statement> {
        match statement {
            SqlStatement::CreateTable(create_table) => Self::parse_create_table(create_table),
            SqlStatement::Drop {
                object_type: ObjectType::Table,
                if_exists,
                names,
                ..
            } => {
                if names.len() != 1 {
                    bail!("Only single table drops are supported");
                }
                Ok(Statement::DropTable {
                    name: object_name(&names[0]),
                    if_exists: *if_exists,
                })
            }
            SqlStatement::Insert(insert) => self.parse_insert(insert),
            SqlStatement::Query(query) => self.parse_select(query),
            SqlStatement::Delete(delete) => self.parse_delete(delete),
            _ => Err(anyhow!("Unsupported SQL statement: {}", statement)),
        }
    }

    fn parse_create_table(create_table: &sqlparser::ast::CreateTable) -> Result<Statement> {
        let mut columns = Vec::new();

        for column_def in &create_table.columns {
            let data_type = parse_data_type(&column_def.data_type)?;

            let primary_key = column_def.options.iter().any(|opt| {
                matches!(
                    opt.option,
                    sqlparser::ast::ColumnOption::Unique {
                        is_primary: true,
                        ..
                    }
                )
            });

            let not_null = column_def
                .options
                .iter()
                .any(|opt| matches!(opt.option, sqlparser::ast::ColumnOption::NotNull));

            columns.push(Column {
                name: column_def.name.value.clone(),
                data_type,
                primary_key,
                nullable: !not_null && !primary_key,
            });
        }

        if columns.is_empty() {
            bail!("CREATE TABLE needs at least one column");
        }

        Ok(Statement::CreateTable {
            name: object_name(&create_table.name),
            schema: Schema::new(columns),
            if_not_exists: create_table.if_not_exists,
        })
    }

    fn parse_insert(&mut self, insert: &sqlparser::ast::Insert) -> Result<Statement> {
        let table_name = object_name(&insert.table_name);
        let columns = insert.columns.iter().map(|c| c.value.clone()).collect();

        let source = insert
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("No values provided"))?;
        let rows = match source.body.as_ref() {
            SetExpr::Values(values) => {
                if values.rows.is_empty() {
                    bail!("No values provided");
                }
                let mut rows = Vec::with_capacity(values.rows.len());
                for row in &values.rows {
                    let mut operands = Vec::with_capacity(row.len());
                    for expr in row {
                        operands.push(self.parse_operand(expr)?);
                    }
                    rows.push(operands);
                }
                rows
            }
            _ => bail!("Unsupported INSERT format"),
        };

        Ok(Statement::Insert {
            table_name,
            columns,
            rows,
        })
    }

    fn parse_select(&mut self, query: &sqlparser::ast::Query) -> Result<Statement> {
        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            _ => bail!("Unsupported SELECT format"),
        };

        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            bail!("SELECT must read from exactly one table");
        }
        let table_name = match &select.from[0].relation {
            TableFactor::Table { name, .. } => object_name(name),
            _ => bail!("Unsupported table reference"),
        };

        let mut projection = Vec::new();
        let mut wildcard = false;
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => wildcard = true,
                SelectItem::UnnamedExpr(expr) => projection.push(column_name(expr)?),
                _ => bail!("Unsupported projection: {}", item),
            }
        }
        if wildcard && !projection.is_empty() {
            bail!("Mixing * with named columns is not supported");
        }

        // Placeholders are numbered in textual order: WHERE first, then
        // LIMIT and OFFSET in whichever order they were written
        let filter = select
            .selection
            .as_ref()
            .map(|expr| self.parse_predicate(expr))
            .transpose()?;
        let (limit, offset) = if self.offset_before_limit {
            let offset = self.parse_offset(query)?;
            (self.parse_limit(query)?, offset)
        } else {
            let limit = self.parse_limit(query)?;
            (limit, self.parse_offset(query)?)
        };

        Ok(Statement::Select(Select {
            table_name,
            projection: if wildcard { None } else { Some(projection) },
            filter,
            limit,
            offset,
        }))
    }

    fn parse_limit(&mut self, query: &sqlparser::ast::Query) -> Result<Option<Operand>> {
        query
            .limit
            .as_ref()
            .map(|expr| self.parse_operand(expr))
            .transpose()
    }

    fn parse_offset(&mut self, query: &sqlparser::ast::Query) -> Result<Option<Operand>> {
        query
            .offset
            .as_ref()
            .map(|offset| self.parse_operand(&offset.value))
            .transpose()
    }

    fn parse_delete(&mut self, delete: &sqlparser::ast::Delete) -> Result<Statement> {
        let tables = match &delete.from {
            FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
        };
        let table_name = match tables.first().map(|t| &t.relation) {
            Some(TableFactor::Table { name, .. }) => object_name(name),
            _ => bail!("No table specified"),
        };

        let filter = delete
            .selection
            .as_ref()
            .map(|expr| self.parse_predicate(expr))
            .transpose()?;

        Ok(Statement::Delete { table_name, filter })
    }

    fn parse_predicate(&mut self, expr: &Expr) -> Result<Predicate> {
        match expr {
            Expr::Nested(inner) => self.parse_predicate(inner),
            Expr::IsNull(inner) => Ok(Predicate::IsNull {
                column: column_name(inner)?,
                negated: false,
            }),
            Expr::IsNotNull(inner) => Ok(Predicate::IsNull {
                column: column_name(inner)?,
                negated: true,
            }),
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => Ok(Predicate::And(
                    Box::new(self.parse_predicate(left)?),
                    Box::new(self.parse_predicate(right)?),
                )),
                BinaryOperator::Or => Ok(Predicate::Or(
                    Box::new(self.parse_predicate(left)?),
                    Box::new(self.parse_predicate(right)?),
                )),
                _ => {
                    let op = compare_op(op)?;
                    // Operands are parsed left to right so placeholder numbering follows the text
                    match (column_name(left), column_name(right)) {
                        (Ok(column), _) => Ok(Predicate::Compare {
                            column,
                            op,
                            operand: self.parse_operand(right)?,
                        }),
                        (Err(_), Ok(column)) => Ok(Predicate::Compare {
                            column,
                            op: op.flipped(),
                            operand: self.parse_operand(left)?,
                        }),
                        (Err(e), Err(_)) => Err(e),
                    }
                }
            },
            _ => Err(anyhow!("Unsupported WHERE clause: {}", expr)),
        }
    }

    fn parse_operand(&mut self, expr: &Expr) -> Result<Operand> {
        match expr {
            Expr::Value(SqlValue::Placeholder(name)) => {
                let index = self.placeholder_index(name)?;
                self.parameter_count = self.parameter_count.max(index + 1);
                Ok(Operand::Parameter(index))
            }
            _ => parse_value(expr).map(Operand::Literal),
        }
    }

    /// `?` takes the next slot; `?N` / `$N` address slot N (1-based)
    fn placeholder_index(&mut self, name: &str) -> Result<usize> {
        if name == "?" {
            let index = self.next_parameter;
            self.next_parameter += 1;
            return Ok(index);
        }
        let number: usize = name
            .get(1..)
            .and_then(|n| n.parse().ok())
            .filter(|n| *n >= 1)
            .ok_or_else(|| anyhow!("Unsupported placeholder: {}", name))?;
        self.next_parameter = number;
        Ok(number - 1)
    }
}

/// Whether the offset is written before the limit. The AST keeps no
/// positions, so look at the tokens: either OFFSET precedes LIMIT, or the
/// limit uses the `LIMIT offset, count` form.
fn offset_before_limit(dialect: &GenericDialect, sql: &str) -> Result<bool> {
    let tokens = Tokenizer::new(dialect, sql)
        .tokenize()
        .map_err(|e| anyhow!("SQL parsing error: {}", e))?;
    let keyword_at = |keyword: Keyword| {
        tokens.iter().rposition(|token| match token {
            Token::Word(word) => word.keyword == keyword,
            _ => false,
        })
    };

    match (keyword_at(Keyword::LIMIT), keyword_at(Keyword::OFFSET)) {
        (Some(limit), Some(offset)) => Ok(offset < limit),
        (Some(limit), None) => {
            let mut depth = 0usize;
            for token in &tokens[limit + 1..] {
                match token {
                    Token::LParen => depth += 1,
                    Token::RParen => depth = depth.saturating_sub(1),
                    Token::Comma if depth == 0 => return Ok(true),
                    _ => {}
                }
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn column_name(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        // t.col - the engine only reads single tables, so the qualifier is dropped
        Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(|i| i.value.clone())
            .ok_or_else(|| anyhow!("Empty identifier")),
        _ => Err(anyhow!("Expected column name, got {}", expr)),
    }
}

fn compare_op(op: &BinaryOperator) -> Result<CompareOp> {
    match op {
        BinaryOperator::Eq => Ok(CompareOp::Eq),
        BinaryOperator::NotEq => Ok(CompareOp::NotEq),
        BinaryOperator::Lt => Ok(CompareOp::Lt),
        BinaryOperator::LtEq => Ok(CompareOp::LtEq),
        BinaryOperator::Gt => Ok(CompareOp::Gt),
        BinaryOperator::GtEq => Ok(CompareOp::GtEq),
        _ => Err(anyhow!("Unsupported operator in WHERE clause: {}", op)),
    }
}

fn parse_data_type(sql_type: &SqlDataType) -> Result<DataType> {
    match sql_type {
        SqlDataType::Int(_) | SqlDataType::Integer(_) | SqlDataType::BigInt(_) => {
            Ok(DataType::Integer)
        }
        SqlDataType::Float(_) | SqlDataType::Double | SqlDataType::Real => Ok(DataType::Float),
        SqlDataType::Text | SqlDataType::Varchar(_) | SqlDataType::String(_) => {
            Ok(DataType::Text)
        }
        SqlDataType::Boolean | SqlDataType::Bool => Ok(DataType::Boolean),
        _ => Err(anyhow!("Unsupported data type: {}", sql_type)),
    }
}

fn parse_value(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Value(SqlValue::Number(n, _)) => {
            if n.contains('.') || n.contains('e') || n.contains('E') {
                Ok(Value::Float(n.parse()?))
            } else {
                Ok(Value::Integer(n.parse()?))
            }
        }
        Expr::Value(SqlValue::SingleQuotedString(s))
        | Expr::Value(SqlValue::DoubleQuotedString(s)) => Ok(Value::Text(s.clone())),
        Expr::Value(SqlValue::Boolean(b)) => Ok(Value::Boolean(*b)),
        Expr::Value(SqlValue::Null) => Ok(Value::Null),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match parse_value(expr)? {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(anyhow!("Cannot negate {}", other)),
        },
        _ => Err(anyhow!("Unsupported value expression: {}", expr)),
    }
}
