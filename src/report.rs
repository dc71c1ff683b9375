//! LLM briefing prompt assembly.
//!
//! Pure templating: one of two fixed instruction templates with the
//! serialized vulnerability set and the localized range label embedded.

use crate::models::{DateRange, ReportType, Vulnerability};

/// Token budget for one briefing.
pub const REPORT_MAX_TOKENS: u32 = 4096;

/// Records fed into the prompt are capped to keep it within budget.
pub const REPORT_VULN_LIMIT: usize = 50;

fn date_range_label(range: DateRange) -> &'static str {
    match range {
        DateRange::Day => "최근 24시간",
        DateRange::Week => "최근 1주일",
        DateRange::Month => "최근 1개월",
    }
}

/// Build the briefing prompt for the given report type.
pub fn build_prompt(
    vulnerabilities: &[Vulnerability],
    report_type: ReportType,
    date_range: DateRange,
) -> String {
    let label = date_range_label(date_range);
    let data = serde_json::to_string_pretty(vulnerabilities).unwrap_or_else(|_| "[]".to_string());

    match report_type {
        ReportType::Summary => format!(
            "당신은 보안 전문가입니다. 다음 취약점 데이터를 분석하여 한국어로 간결한 보고서를 작성해주세요.\n\
             \n\
             ## 보고서 형식\n\
             - 제목: \"보안 취약점 브리핑 - {label}\"\n\
             - 핵심 요약: 3-5문장\n\
             - 주요 취약점: Critical/High만 bullet point로\n\
             - 영향받는 주요 제품/패키지\n\
             - 권장 조치사항\n\
             \n\
             ## 작성 원칙\n\
             - 기술적이지만 이해하기 쉽게\n\
             - 구체적인 CVE ID 포함\n\
             - 마크다운 형식 사용\n\
             - 취약점이 없으면 \"선택한 기간에 새로운 취약점이 발견되지 않았습니다\"라고 명시\n\
             \n\
             ## 취약점 데이터\n\
             {data}"
        ),
        ReportType::Detailed => format!(
            "당신은 보안 전문가입니다. 다음 취약점 데이터를 분석하여 한국어로 상세한 보고서를 작성해주세요.\n\
             \n\
             ## 보고서 형식\n\
             - 제목: \"보안 취약점 상세 보고서 - {label}\"\n\
             - 개요: 전체 현황 요약\n\
             - 심각도별 분석: Critical → High → Medium → Low 순\n\
             - 소스별 분석: 각 소스별 주요 내용\n\
             - 영향 분석: 영향받는 제품/패키지 상세\n\
             - 권장 조치사항: 우선순위별 정리\n\
             - 참고 링크: 주요 취약점 원본 링크\n\
             \n\
             ## 작성 원칙\n\
             - 상세하고 전문적으로\n\
             - 각 취약점에 대한 설명 포함\n\
             - CVSS 점수 명시\n\
             - 마크다운 형식 사용\n\
             - 취약점이 없으면 \"선택한 기간에 새로운 취약점이 발견되지 않았습니다\"라고 명시\n\
             \n\
             ## 취약점 데이터\n\
             {data}"
        ),
    }
}
