use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use weighsheet_core::{DocumentStatus, ErrorCode, ReconcileConfig, Reconciler};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

#[derive(Clone, Copy)]
enum Value {
    Text(&'static str),
    Number(f64),
    /// Number displayed with the "0.000" format
    ThreeDecimals(f64),
}

use Value::{Number, Text, ThreeDecimals};

struct MockSheet {
    name: &'static str,
    cells: Vec<(&'static str, Value)>,
    merges: Vec<&'static str>,
}

fn row_of(cell_ref: &str) -> u32 {
    cell_ref
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .unwrap()
}

/// Write a minimal XLSX package with shared strings, one custom number
/// format and merged regions
fn create_mock_xlsx(path: &Path, sheets: &[MockSheet]) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    let mut shared: Vec<&str> = Vec::new();
    let mut sheet_xml = Vec::new();
    for sheet in sheets {
        let mut rows: BTreeMap<u32, String> = BTreeMap::new();
        for (cell_ref, value) in &sheet.cells {
            let xml = match value {
                Text(s) => {
                    let idx = shared.iter().position(|e| e == s).unwrap_or_else(|| {
                        shared.push(*s);
                        shared.len() - 1
                    });
                    format!(r#"<c r="{}" t="s"><v>{}</v></c>"#, cell_ref, idx)
                }
                Number(n) => format!(r#"<c r="{}"><v>{}</v></c>"#, cell_ref, n),
                ThreeDecimals(n) => format!(r#"<c r="{}" s="1"><v>{}</v></c>"#, cell_ref, n),
            };
            rows.entry(row_of(cell_ref)).or_default().push_str(&xml);
        }

        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
        );
        for (row, cells) in &rows {
            xml.push_str(&format!(r#"<row r="{}">{}</row>"#, row, cells));
        }
        xml.push_str("</sheetData>");
        if !sheet.merges.is_empty() {
            xml.push_str(&format!(r#"<mergeCells count="{}">"#, sheet.merges.len()));
            for merge in &sheet.merges {
                xml.push_str(&format!(r#"<mergeCell ref="{}"/>"#, merge));
            }
            xml.push_str("</mergeCells>");
        }
        xml.push_str("</worksheet>");
        sheet_xml.push(xml);
    }

    zip.start_file("[Content_Types].xml", options)?;
    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>
"#,
    );
    for i in 1..=sheets.len() {
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            i
        ));
    }
    content_types.push_str("</Types>");
    zip.write_all(content_types.as_bytes())?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#
            .as_bytes(),
    )?;

    zip.start_file("xl/workbook.xml", options)?;
    let mut workbook_xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    for (i, sheet) in sheets.iter().enumerate() {
        workbook_xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            sheet.name,
            i + 1,
            i + 1
        ));
    }
    workbook_xml.push_str("</sheets></workbook>");
    zip.write_all(workbook_xml.as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    let mut rels_xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for i in 1..=sheets.len() {
        rels_xml.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            i, i
        ));
    }
    let base = sheets.len();
    rels_xml.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
        base + 1
    ));
    rels_xml.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#,
        base + 2
    ));
    rels_xml.push_str("</Relationships>");
    zip.write_all(rels_xml.as_bytes())?;

    zip.start_file("xl/styles.xml", options)?;
    zip.write_all(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<numFmts count="1"><numFmt numFmtId="164" formatCode="0.000"/></numFmts>
<cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="164" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/></cellXfs>
</styleSheet>"#
            .as_bytes(),
    )?;

    zip.start_file("xl/sharedStrings.xml", options)?;
    let mut strings_xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">"#,
        shared.len()
    );
    for s in &shared {
        strings_xml.push_str(&format!("<si><t>{}</t></si>", s));
    }
    strings_xml.push_str("</sst>");
    zip.write_all(strings_xml.as_bytes())?;

    for (i, xml) in sheet_xml.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)?;
        zip.write_all(xml.as_bytes())?;
    }

    zip.finish()?;
    Ok(())
}

fn invoice_sheet() -> MockSheet {
    invoice_sheet_with_currency("USD")
}

fn invoice_sheet_with_currency(currency: &'static str) -> MockSheet {
    let mut cells = vec![
        ("A1", Text("ACME TRADING CO.")),
        ("A3", Text("Invoice No.:")),
        ("B3", Text("AB-2024-001")),
    ];
    let header = [
        "Part No.", "PO No.", "Qty", "Unit Price", "Amount", "Currency", "COO", "Brand",
        "Brand Type", "Model",
    ];
    let header_refs = ["A8", "B8", "C8", "D8", "E8", "F8", "G8", "H8", "I8", "J8"];
    for (cell_ref, text) in header_refs.into_iter().zip(header) {
        cells.push((cell_ref, Text(text)));
    }
    cells.extend([
        ("A9", Text("ABC-001")),
        ("B9", Text("PO100")),
        ("C9", Number(10.0)),
        ("D9", Number(1.5)),
        ("E9", Number(15.0)),
        ("F9", Text("USD")),
        ("G9", Text("CN")),
        ("H9", Text("Acme")),
        ("I9", Text("OEM")),
        ("J9", Text("M1")),
        ("A10", Text("XYZ-002")),
        ("B10", Text("PO100/A")),
        ("C10", Number(20.0)),
        ("D10", Number(2.0)),
        ("E10", Number(40.0)),
        ("F10", Text("USD")),
        ("G10", Text("CN")),
        ("H10", Text("Acme")),
        ("I10", Text("OEM")),
        ("J10", Text("M2")),
        ("A11", Text("XYZ-002")),
        ("B11", Text("PO101")),
        ("C11", Number(10.0)),
        ("D11", Number(2.0)),
        ("E11", Number(20.0)),
        ("F11", Text(currency)),
        ("G11", Text("CN")),
        ("H11", Text("Acme")),
        ("I11", Text("OEM")),
        ("J11", Text("M2")),
        ("A12", Text("TOTAL")),
        ("C12", Number(40.0)),
        ("E12", Number(75.0)),
    ]);
    MockSheet {
        name: "Invoice",
        cells,
        merges: vec![],
    }
}

fn packing_sheet(with_packets: bool) -> MockSheet {
    let mut cells = vec![
        ("A1", Text("PACKING LIST")),
        ("A8", Text("Part No.")),
        ("B8", Text("Qty")),
        ("C8", Text("N.W.(KG)")),
        ("D8", Text("G.W.(KG)")),
        ("E8", Text("CTNS")),
        ("A9", Text("ABC-001")),
        ("B9", Number(10.0)),
        ("C9", Number(3.125)),
        ("D9", Number(4.0)),
        ("E9", Number(1.0)),
        ("A10", Text("XYZ-002")),
        ("B10", Number(20.0)),
        ("C10", Number(6.875)),
        ("D10", Number(8.5)),
        ("E10", Number(1.0)),
        ("B11", Number(10.0)),
        ("A12", Text("TOTAL")),
        ("B12", Number(40.0)),
        ("C12", ThreeDecimals(10.0)),
        ("D12", Number(12.5)),
    ];
    if with_packets {
        cells.push(("A14", Text("共2托")));
    }
    MockSheet {
        name: "Packing List",
        cells,
        merges: vec!["A1:E1", "A10:A11", "C10:C11", "D10:D11"],
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn reconciler() -> Reconciler {
    Reconciler::from_config(&ReconcileConfig::default()).unwrap()
}

#[test]
fn test_full_pipeline_allocates_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shipment.xlsx");
    create_mock_xlsx(&path, &[invoice_sheet(), packing_sheet(true)]).unwrap();

    let report = reconciler().process_file(&path);

    assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);
    assert_eq!(report.status, DocumentStatus::Success);
    assert_eq!(report.invoice_sheet.as_deref(), Some("Invoice"));
    assert_eq!(report.packing_sheet.as_deref(), Some("Packing List"));
    assert_eq!(report.invoice_number.as_deref(), Some("AB-2024-001"));

    let totals = report.totals.as_ref().unwrap();
    assert_eq!(totals.total_net_weight, dec("10"));
    assert_eq!(totals.total_net_weight_precision, 3);
    assert_eq!(totals.total_gross_weight, dec("12.5"));
    assert_eq!(totals.total_packets, Some(2));

    let allocation = report.allocation.as_ref().unwrap();
    assert_eq!(allocation.packing_precision, 3);
    assert_eq!(allocation.part_weights["XYZ-002"], dec("6.875"));

    let weights: Vec<Decimal> = report
        .lines
        .iter()
        .map(|line| line.allocated_weight.unwrap())
        .collect();
    assert_eq!(weights, vec![dec("3.125"), dec("4.5833"), dec("2.2917")]);
    assert_eq!(weights.iter().copied().sum::<Decimal>(), dec("10"));
    assert!(report.lines.iter().all(|l| l.invoice_number == "AB-2024-001"));

    let first = &report.lines[0];
    assert_eq!(first.unit_price, dec("1.5"));
    assert_eq!(first.amount, dec("15"));
    assert_eq!(first.brand, "Acme");
    assert_eq!(first.model, "M1");
    // Lookup codes and cleaned PO numbers
    assert!(report.lines.iter().all(|l| l.currency == "502" && l.country_of_origin == "142"));
    assert_eq!(report.lines[1].po_number, "PO100");
    assert_eq!(report.lines[2].po_number, "PO101");
}

#[test]
fn test_unknown_currency_needs_attention() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shipment.xlsx");
    create_mock_xlsx(&path, &[invoice_sheet_with_currency("DOUBLOON"), packing_sheet(true)]).unwrap();

    let report = reconciler().process_file(&path);
    assert_eq!(report.status, DocumentStatus::Attention);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].code, "ATT_003");
    assert_eq!(report.lines[2].currency, "DOUBLOON");
    // Allocation still runs
    assert!(report.allocation.is_some());
}

#[test]
fn test_directory_batch_skips_lock_files() {
    let dir = tempfile::tempdir().unwrap();
    create_mock_xlsx(&dir.path().join("a.xlsx"), &[invoice_sheet(), packing_sheet(true)]).unwrap();
    create_mock_xlsx(&dir.path().join("b.xlsx"), &[invoice_sheet(), packing_sheet(false)]).unwrap();
    create_mock_xlsx(&dir.path().join("~$a.xlsx"), &[invoice_sheet(), packing_sheet(true)]).unwrap();

    let batch = reconciler().process_batch(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(batch.summary.total, 2);
    assert_eq!(batch.summary.success, 1);
    assert_eq!(batch.summary.attention, 1);
    assert_eq!(batch.summary.failed, 0);
    assert!(batch.documents[0].file.ends_with("a.xlsx"));
}

#[test]
fn test_missing_packet_count_needs_attention() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no_packets.xlsx");
    create_mock_xlsx(&path, &[invoice_sheet(), packing_sheet(false)]).unwrap();

    let report = reconciler().process_file(&path);

    assert_eq!(report.status, DocumentStatus::Attention);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].code, "ATT_002");
    assert!(report.lines.iter().all(|l| l.allocated_weight.is_some()));
}

#[test]
fn test_merged_weight_across_parts_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared_weight.xlsx");
    let packing = MockSheet {
        name: "Packing",
        cells: vec![
            ("A8", Text("Part No.")),
            ("B8", Text("Qty")),
            ("C8", Text("N.W.(KG)")),
            ("D8", Text("G.W.(KG)")),
            ("A9", Text("ABC-001")),
            ("B9", Number(10.0)),
            ("C9", Number(10.0)),
            ("D9", Number(12.0)),
            ("A10", Text("XYZ-002")),
            ("B10", Number(30.0)),
            ("D10", Number(1.0)),
            ("A11", Text("TOTAL")),
            ("C11", Number(10.0)),
            ("D11", Number(13.0)),
        ],
        merges: vec!["C9:C10"],
    };
    create_mock_xlsx(&path, &[invoice_sheet(), packing]).unwrap();

    let report = reconciler().process_file(&path);

    assert_eq!(report.status, DocumentStatus::Failed);
    assert_eq!(report.errors.len(), 1);
    let err = &report.errors[0];
    assert_eq!(err.code, ErrorCode::SharedMergedWeight);
    assert_eq!(err.context.part_numbers, vec!["ABC-001", "XYZ-002"]);
    assert!(report.allocation.is_none());
}

#[test]
fn test_unreadable_file_fails_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.xlsx");
    std::fs::write(&path, b"this is not a zip archive").unwrap();

    let report = reconciler().process_file(&path);

    assert_eq!(report.status, DocumentStatus::Failed);
    assert_eq!(report.errors[0].code, ErrorCode::UnreadableWorkbook);
    assert!(report.errors[0].message.contains("broken.xlsx"));
}

#[test]
fn test_report_serializes_to_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shipment.xlsx");
    create_mock_xlsx(&path, &[invoice_sheet(), packing_sheet(true)]).unwrap();

    let report = reconciler().process_file(&path);
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["status"], "success");
    assert_eq!(json["invoice_number"], "AB-2024-001");
    assert_eq!(json["totals"]["total_packets"], 2);
    assert_eq!(json["lines"].as_array().unwrap().len(), 3);
    assert!(json["errors"].as_array().unwrap().is_empty());
}
