//! The user message sent to the upstream bot.

use itinera_shared::TravelRequestParams;

/// Render the planning instruction for `params`.
///
/// Optional fields that are missing or blank are left out. The answer format
/// requested here is the anchored layout the section splitter looks for.
pub fn build_prompt(params: &TravelRequestParams) -> String {
    let mut lines = vec![format!("出发地：{}", params.location.trim())];

    if let Some(destination) = params.explicit_destination() {
        lines.push(format!("目的地：{destination}"));
    }
    lines.push(format!("旅行天数：{}天", params.days.trim()));
    if let Some(travelers) = non_blank(params.travelers.as_deref()) {
        lines.push(format!("出行人数：{travelers}人"));
    }
    if let Some(preference) = non_blank(params.preference.as_deref()) {
        lines.push(format!("旅行偏好：{preference}"));
    }
    if let Some(budget) = non_blank(params.budget.as_deref()) {
        lines.push(format!("预算：{budget}元"));
    }

    let task = if params.explicit_destination().is_some() {
        "请根据以上信息规划这次旅行。"
    } else {
        "请根据以上信息推荐一个合适的目的地并规划这次旅行。"
    };

    format!(
        "{}\n\n{task}\n\
         请严格按以下三个部分回答，每部分以对应标题开头：\n\
         旅行推荐：目的地与旅行主题\n\
         行程规划：按天列出的详细行程\n\
         旅行红黑榜：值得推荐的体验和需要避开的坑",
        lines.join("\n")
    )
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
