//! Integration tests for format-preserving replacement.

use docstamp::model::{Document, Paragraph, Run, RunFormat};
use docstamp::patch::{apply_fields, patch, FieldRule, NumberingPattern, RunPatcher};
use docstamp::Error;

fn styled(parts: &[(&str, &str)]) -> Paragraph {
    Paragraph::from_runs(parts.iter().map(|(t, f)| (*t, RunFormat::tagged(*f))))
}

#[test]
fn test_split_target_scenario() {
    let mut para = styled(&[("AB", "r0"), ("C—X", "r1"), ("YZ", "r2")]);
    let before = para.clone();

    assert!(patch(&mut para, "C—X", "Q"));
    assert_eq!(para.text(), "ABQYZ");
    assert_eq!(para.runs[0], before.runs[0]);
    assert_eq!(para.runs[1].text, "Q");
    assert_eq!(para.runs[1].format, before.runs[1].format);
    assert_eq!(para.runs[2], before.runs[2]);
}

#[test]
fn test_every_substring_replaces_once_and_spares_other_runs() {
    let original = styled(&[
        ("关于", "plain"),
        ("某某", "bold"),
        ("公司存在", "plain"),
        ("—", "dash"),
        ("漏洞的通报", "italic"),
    ]);
    let text = original.text();
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let ranges = original.run_ranges();

    for i in 0..chars.len() {
        for j in i + 1..=chars.len() {
            let start = chars[i].0;
            let end = chars.get(j).map_or(text.len(), |c| c.0);
            let needle = &text[start..end];
            // The patcher targets the first occurrence.
            if text.find(needle) != Some(start) {
                continue;
            }

            let mut para = original.clone();
            assert!(patch(&mut para, needle, "#"), "needle {:?}", needle);
            assert_eq!(para.text(), text.replacen(needle, "#", 1));
            assert_eq!(para.runs.len(), original.runs.len());

            for (k, range) in ranges.iter().enumerate() {
                let overlaps = range.start < end && start < range.end;
                if !overlaps {
                    assert_eq!(para.runs[k], original.runs[k], "run {} touched by {:?}", k, needle);
                }
                assert_eq!(para.runs[k].format, original.runs[k].format);
            }
        }
    }
}

#[test]
fn test_absent_target_leaves_runs_identical() {
    let original = styled(&[("AB", "a"), ("CD", "b")]);
    let mut para = original.clone();

    assert!(!patch(&mut para, "BX", "Q"));
    assert_eq!(para, original);

    let err = RunPatcher::new().apply(&mut para, "zz", "Q").unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(para, original);
}

#[test]
fn test_hyperlink_runs_are_protected() {
    let mut para = Paragraph::new();
    para.add_run(Run::new("详见"));
    para.add_run(Run::new("https://example.org").linked("https://example.org"));

    let patcher = RunPatcher::new().preserve_hyperlinks(true);
    assert!(!patcher.patch(&mut para, "example", "other"));
    assert!(patcher.patch(&mut para, "详见", "参见"));
    assert_eq!(para.text(), "参见https://example.org");
}

#[test]
fn test_stamp_keeps_run_formats() {
    let mut doc = Document::from_paragraphs(vec![
        Paragraph::with_text("网络安全通报"),
        styled(&[("〔20", "red"), ("24〕第", "red-bold"), ("7", "num"), ("期", "red")]),
    ]);
    let formats: Vec<_> = doc.paragraphs[1].runs.iter().map(|r| r.format.clone()).collect();

    let stamp = NumberingPattern::notification()
        .stamp(&mut doc, 2025, 104)
        .unwrap()
        .unwrap();

    assert_eq!(stamp.paragraph_index, 1);
    assert_eq!(stamp.old_year, "2024");
    assert_eq!(stamp.old_number, "7");
    assert_eq!(doc.paragraphs[1].text(), "〔2025〕第104期");
    assert_eq!(doc.paragraphs[1].runs[2].text, "104");
    let after: Vec<_> = doc.paragraphs[1].runs.iter().map(|r| r.format.clone()).collect();
    assert_eq!(after, formats);
}

#[test]
fn test_letter_fields() {
    let mut paragraphs: Vec<Paragraph> = (0..14).map(|i| Paragraph::with_text(format!("正文{}", i))).collect();
    paragraphs[3] = Paragraph::with_text("关于甲乙科技有限公司网络安全漏洞的通报");
    paragraphs[5] = Paragraph::with_text("甲乙科技有限公司：");
    paragraphs[6] = Paragraph::with_text("你单位存在弱口令漏洞，请于2024年5月1日前完成整改。");
    let mut doc = Document::from_paragraphs(paragraphs);

    let values = [
        ("company", "丙丁股份有限公司"),
        ("deadline", "2025年3月14日"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let report = apply_fields(&mut doc, &FieldRule::letter_defaults(), &values);

    assert_eq!(doc.paragraphs[3].text(), "关于丙丁股份有限公司网络安全漏洞的通报");
    assert_eq!(doc.paragraphs[5].text(), "丙丁股份有限公司：");
    assert!(doc.paragraphs[6].text().contains("2025年3月14日前"));
    assert_eq!(report.applied.len(), 3);
    assert!(report.missing.is_empty());
}
