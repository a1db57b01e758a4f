//! Instruction prompt sent ahead of the document text.
//!
//! The section markers and header rows are a contract with
//! [`crate::extraction::unpack`]; keep them in sync.

/// Instructions for the extraction model.
pub const EXTRACTION_PROMPT: &str = r#"You extract environmental metrics for a sustainability reporting tool.

Read the document text at the end of this message and extract ONLY values that belong to a specific calendar month and year (for example "January 2021", "Jan 2021", "2021-01"). Ignore quarterly and yearly figures that are not broken down by month.

Metrics and the units to normalize them to:
- CO2 / GHG emissions -> kilograms (co2_kg). 1 metric ton = 1,000 kg.
- Plastic waste -> pounds (plastic_lbs). 1 kg = 2.20462 lbs. 1 short ton = 2,000 lbs.
- Water usage -> gallons (water_gal). 1 m3 = 264.172 gal. 1 liter = 0.264172 gal.
- Energy usage -> kilowatt-hours (energy_kwh). 1 MWh = 1,000 kWh.

If a value cannot be converted confidently, leave it out.

Then compute annual totals by summing YOUR monthly records per year. Never mix in yearly totals quoted by the document.

Answer with exactly two CSV blocks and nothing else, in this form:

MONTHLY_DATA_CSV
```csv
year,month,month_label,co2_kg,plastic_lbs,water_gal,energy_kwh
2020,1,January,1200.5,45.2,5000,2500
```

ANNUAL_DATA_CSV
```csv
year,co2_kg,plastic_lbs,water_gal,energy_kwh
2020,1200.5,45.2,5000,2500
```

Use 0 when a metric is missing for a month. If no monthly data exists, output both blocks with only their header rows.

Document text:"#;

/// Full prompt for a document.
pub fn build_prompt(document_text: &str) -> String {
    format!("{}\n\n{}", EXTRACTION_PROMPT, document_text)
}
