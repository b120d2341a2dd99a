use std::fmt::Write as _;

use rust_decimal::Decimal;

use super::NotificationKind;
use crate::models::{ItemProvenance, Language, LineItem, Order, PaymentMethod};
use crate::services::pricing::round_for_display;

struct Phrases {
    created_greeting: &'static str,
    amended_greeting: &'static str,
    order: &'static str,
    delivery: &'static str,
    items: &'static str,
    changed_items: &'static str,
    unchanged_items: &'static str,
    subtotal: &'static str,
    tax: &'static str,
    total: &'static str,
    amount_due: &'static str,
    payment: &'static str,
    cash_on_delivery: &'static str,
    online_banking: &'static str,
    added: &'static str,
    updated: &'static str,
    closing: &'static str,
}

const EN: Phrases = Phrases {
    created_greeting: "Thank you for your order",
    amended_greeting: "Your order has been updated",
    order: "Order",
    delivery: "Delivery",
    items: "Items",
    changed_items: "Added / updated items",
    unchanged_items: "Unchanged items",
    subtotal: "Subtotal",
    tax: "SST (6%)",
    total: "Total",
    amount_due: "Amount due",
    payment: "Payment",
    cash_on_delivery: "Cash on delivery",
    online_banking: "Online banking (FPX)",
    added: "new",
    updated: "updated",
    closing: "We will keep you posted on your delivery.",
};

const MS: Phrases = Phrases {
    created_greeting: "Terima kasih atas pesanan anda",
    amended_greeting: "Pesanan anda telah dikemas kini",
    order: "Pesanan",
    delivery: "Penghantaran",
    items: "Barangan",
    changed_items: "Barangan ditambah / dikemas kini",
    unchanged_items: "Barangan tidak berubah",
    subtotal: "Jumlah kecil",
    tax: "SST (6%)",
    total: "Jumlah",
    amount_due: "Amaun perlu dibayar",
    payment: "Bayaran",
    cash_on_delivery: "Tunai semasa penghantaran",
    online_banking: "Perbankan dalam talian (FPX)",
    added: "baharu",
    updated: "dikemas kini",
    closing: "Kami akan memaklumkan status penghantaran anda.",
};

const ZH: Phrases = Phrases {
    created_greeting: "感谢您的订购",
    amended_greeting: "您的订单已更新",
    order: "订单",
    delivery: "送货",
    items: "商品",
    changed_items: "新增 / 更新的商品",
    unchanged_items: "未更改的商品",
    subtotal: "小计",
    tax: "销售及服务税 (6%)",
    total: "总计",
    amount_due: "应付金额",
    payment: "付款方式",
    cash_on_delivery: "货到付款",
    online_banking: "网上银行 (FPX)",
    added: "新增",
    updated: "已更新",
    closing: "我们会随时通知您送货进度。",
};

fn phrases(language: Language) -> &'static Phrases {
    match language {
        Language::En => &EN,
        Language::Ms => &MS,
        Language::Zh => &ZH,
    }
}

/// `RM 50.40`
pub fn format_amount(amount: Decimal) -> String {
    format!("RM {:.2}", round_for_display(amount))
}

fn item_line(item: &LineItem, language: Language, marker: Option<&str>) -> String {
    let unit = item.unit.as_deref().map(|u| format!(" {u}")).unwrap_or_default();
    let marker = marker.map(|m| format!(" ({m})")).unwrap_or_default();
    format!(
        "- {} x{}{} @ {} = {}{}",
        item.display_name(language),
        item.quantity,
        unit,
        format_amount(item.unit_price),
        format_amount(item.line_total()),
        marker
    )
}

fn push_items(body: &mut String, order: &Order, kind: NotificationKind, language: Language) {
    let p = phrases(language);
    match kind {
        NotificationKind::Created => {
            let _ = writeln!(body, "{}:", p.items);
            for item in &order.line_items {
                let _ = writeln!(body, "{}", item_line(item, language, None));
            }
        }
        NotificationKind::Amended => {
            let (changed, unchanged): (Vec<_>, Vec<_>) = order
                .line_items
                .iter()
                .partition(|item| item.provenance != ItemProvenance::Original);

            let _ = writeln!(body, "{}:", p.changed_items);
            for item in changed {
                let marker = match item.provenance {
                    ItemProvenance::Added => p.added,
                    _ => p.updated,
                };
                let _ = writeln!(body, "{}", item_line(item, language, Some(marker)));
            }
            if !unchanged.is_empty() {
                let _ = writeln!(body, "{}:", p.unchanged_items);
                for item in unchanged {
                    let _ = writeln!(body, "{}", item_line(item, language, None));
                }
            }
        }
    }
}

fn push_totals(body: &mut String, order: &Order, kind: NotificationKind, language: Language) {
    let p = phrases(language);
    let _ = writeln!(body, "{}: {}", p.subtotal, format_amount(order.subtotal));
    let _ = writeln!(body, "{}: {}", p.tax, format_amount(order.tax_amount));
    let _ = writeln!(body, "{}: {}", p.total, format_amount(order.total));
    if kind == NotificationKind::Amended && order.amount_paid > Decimal::ZERO {
        let _ = writeln!(
            body,
            "{}: {}",
            p.amount_due,
            format_amount(order.outstanding_amount())
        );
    }
    let method = match order.payment_method {
        PaymentMethod::CashOnDelivery => p.cash_on_delivery,
        PaymentMethod::OnlineBanking => p.online_banking,
    };
    let _ = writeln!(body, "{}: {}", p.payment, method);
}

/// Message to the buyer in the order's language.
pub fn buyer_message(order: &Order, kind: NotificationKind) -> String {
    let language = order.language;
    let p = phrases(language);
    let mut body = String::new();

    let greeting = match kind {
        NotificationKind::Created => p.created_greeting,
        NotificationKind::Amended => p.amended_greeting,
    };
    let _ = writeln!(body, "{}, {}!", greeting, order.buyer.contact_name);
    let _ = writeln!(body, "{}: {}", p.order, order.order_number);
    let _ = writeln!(
        body,
        "{}: {}, {}",
        p.delivery,
        order.delivery_date.format("%d/%m/%Y"),
        order.delivery_time_slot
    );
    body.push('\n');
    push_items(&mut body, order, kind, language);
    body.push('\n');
    push_totals(&mut body, order, kind, language);
    body.push('\n');
    body.push_str(p.closing);
    body
}

/// English message to operations with a dashboard link.
pub fn admin_message(order: &Order, kind: NotificationKind, admin_base_url: &str) -> String {
    let mut body = String::new();
    let headline = match kind {
        NotificationKind::Created => "New order",
        NotificationKind::Amended => "Order amended",
    };
    let _ = writeln!(
        body,
        "{} {} from {}",
        headline, order.order_number, order.buyer.business_name
    );
    let _ = writeln!(
        body,
        "Contact: {} ({})",
        order.buyer.contact_name, order.buyer.phone
    );
    let _ = writeln!(body, "Address: {}", order.buyer.address);
    let _ = writeln!(
        body,
        "Delivery: {}, {}",
        order.delivery_date.format("%d/%m/%Y"),
        order.delivery_time_slot
    );
    body.push('\n');
    push_items(&mut body, order, kind, Language::En);
    body.push('\n');
    push_totals(&mut body, order, kind, Language::En);
    let _ = write!(
        body,
        "\nView: {}/admin/orders/{}",
        admin_base_url.trim_end_matches('/'),
        order.id
    );
    body
}
