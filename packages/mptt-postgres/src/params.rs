use std::error::Error as StdError;

use bytes::BytesMut;
use mptt_core::sql::SqlValue;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};

/// Binds a rendered [`SqlValue`] to whatever type the server inferred for the
/// placeholder. Integers narrow to `INT2`/`INT4` when the column is smaller.
#[derive(Debug)]
pub(crate) struct PgParam<'a>(pub &'a SqlValue);

type BoxError = Box<dyn StdError + Sync + Send>;

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::INT8 => v.to_sql(ty, out),
                _ => Err(format!("cannot bind an integer to a {ty} parameter").into()),
            },
            SqlValue::Text(v) if <&str as ToSql>::accepts(ty) => v.as_str().to_sql(ty, out),
            SqlValue::Bytes(v) if <&[u8] as ToSql>::accepts(ty) => v.as_slice().to_sql(ty, out),
            other => Err(format!("cannot bind {other:?} to a {ty} parameter").into()),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

pub(crate) fn bind(values: &[SqlValue]) -> Vec<PgParam<'_>> {
    values.iter().map(PgParam).collect()
}

pub(crate) fn refs<'a>(params: &'a [PgParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}
