use comfy_table::{presets::NOTHING, *};
use itertools::izip;

use climdem::{
    join::MapFrame,
    metadata::{MetadataStatus, MetadataTable},
    COL,
};
use polars::frame::DataFrame;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

pub fn display_variables(variables: &[String], metadata: &MetadataTable) -> anyhow::Result<()> {
    let mut table = new_table();
    table.set_header(header(&["Variable", "Description", "Source"]));
    for variable in variables {
        match metadata.lookup(variable)? {
            MetadataStatus::Found(found) => {
                table.add_row(vec![variable.clone(), found.description, found.source])
            }
            MetadataStatus::NotFound { .. } => {
                table.add_row(vec![variable.clone(), "(no metadata)".into(), "".into()])
            }
        };
    }
    println!("\n{}", table);
    Ok(())
}

pub fn display_metadata(status: &MetadataStatus) {
    match status {
        MetadataStatus::Found(metadata) => {
            let mut table = new_table();
            table
                .add_row(vec![
                    Cell::new("Variable").add_attribute(Attribute::Bold),
                    metadata.variable.as_str().into(),
                ])
                .add_row(vec![
                    Cell::new("Description").add_attribute(Attribute::Bold),
                    metadata.description.as_str().into(),
                ])
                .add_row(vec![
                    Cell::new("Source").add_attribute(Attribute::Bold),
                    metadata.source.as_str().into(),
                ]);
            if let Some(column) = table.column_mut(0) {
                column.set_cell_alignment(CellAlignment::Right);
            }
            println!("\n{}", table);
        }
        MetadataStatus::NotFound { .. } => println!("{status}"),
    }
}

pub fn display_countries(countries: &[String]) {
    let mut table = new_table();
    table.set_header(header(&["Country"]));
    for country in countries {
        table.add_row(vec![country]);
    }
    println!("\n{}", table);
}

pub fn display_time_series(df: &DataFrame) -> anyhow::Result<()> {
    let mut table = new_table();
    table.set_header(header(&["Country", "Year", "Value"]));
    for (country, year, value) in izip!(
        df.column(COL::COUNTRY)?.str()?,
        df.column(COL::YEAR)?.i32()?,
        df.column(COL::VALUE)?.f64()?,
    ) {
        table.add_row(vec![
            country.unwrap_or_default().to_string(),
            year.map(|y| y.to_string()).unwrap_or_default(),
            value.map(|v| v.to_string()).unwrap_or_default(),
        ]);
    }
    println!("\n{}", table);
    Ok(())
}

/// One line per animation frame
pub fn display_frame_summary(frame: &MapFrame) -> anyhow::Result<()> {
    let range = frame
        .range
        .map(|range| format!(" (scale {} to {})", range.min, range.max))
        .unwrap_or_default();
    println!(
        "{}: {} of {} countries with data{range}",
        frame.title(),
        frame.with_data()?,
        frame.len()
    );
    Ok(())
}
