use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use crate::distance_matrix::DistanceMatrix;

const ID_HEADER: &str = "ID";

/// Writes the matrix with station ids as row and column labels. Unset
/// distances are written as empty fields.
pub fn write_matrix_csv<W: Write>(
    writer: W,
    ids: &[String],
    matrix: &DistanceMatrix,
) -> Result<(), anyhow::Error> {
    if ids.len() != matrix.num_stations() {
        return Err(anyhow::anyhow!(
            "{} ids for a matrix of {} stations",
            ids.len(),
            matrix.num_stations()
        ));
    }

    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(ids.len() + 1);
    header.push(ID_HEADER);
    header.extend(ids.iter().map(String::as_str));
    wtr.write_record(&header)?;

    for (id, row) in ids.iter().zip(matrix.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(id.clone());
        record.extend(row.iter().map(|d| {
            if d.is_nan() {
                String::new()
            } else {
                d.to_string()
            }
        }));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;

    Ok(())
}

pub fn write_matrix_file<P: AsRef<Path>>(
    path: P,
    ids: &[String],
    matrix: &DistanceMatrix,
) -> Result<(), anyhow::Error> {
    let file = File::create(path.as_ref())?;
    write_matrix_csv(file, ids, matrix)
}

/// Reads a matrix written by [`write_matrix_csv`]. Row labels must repeat the
/// column labels in the same order.
pub fn read_matrix_csv<R: Read>(reader: R) -> Result<(Vec<String>, DistanceMatrix), anyhow::Error> {
    let mut rdr = csv::Reader::from_reader(reader);

    let ids: Vec<String> = rdr.headers()?.iter().skip(1).map(String::from).collect();
    let mut rows = Vec::with_capacity(ids.len());

    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let label = record.get(0).unwrap_or_default();

        if ids.get(i).map(String::as_str) != Some(label) {
            return Err(anyhow::anyhow!(
                "Row {} is labelled {:?}, expected {:?}",
                i + 1,
                label,
                ids.get(i)
            ));
        }

        let row = record
            .iter()
            .skip(1)
            .map(|field| {
                let field = field.trim();
                if field.is_empty() || field.eq_ignore_ascii_case("nan") {
                    Ok(f64::NAN)
                } else {
                    field
                        .parse::<f64>()
                        .map_err(|_| anyhow::anyhow!("Invalid distance {:?} on row {}", field, i + 1))
                }
            })
            .collect::<Result<Vec<f64>, _>>()?;
        rows.push(row);
    }

    if rows.len() != ids.len() {
        return Err(anyhow::anyhow!(
            "{} rows for {} columns",
            rows.len(),
            ids.len()
        ));
    }

    let matrix = DistanceMatrix::from_rows(rows).map_err(|err| anyhow::anyhow!(err))?;

    Ok((ids, matrix))
}

pub fn read_matrix_file<P: AsRef<Path>>(path: P) -> Result<(Vec<String>, DistanceMatrix), anyhow::Error> {
    let file = File::open(path.as_ref())?;
    read_matrix_csv(file)
}
