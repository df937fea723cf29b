use std::thread;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use client_core::{ClientEvent, CreateOrderError, OrderDeskClient};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use eframe::egui;
use shared::{
    domain::{OrderId, Role, UserId},
    protocol::{ChatMessagePayload, CreateOrderRequest, OrderSummary},
};

enum BackendCommand {
    Login {
        server_url: String,
        username: String,
    },
    RefreshOrders,
    CreateOrder {
        request: CreateOrderRequest,
    },
    OpenChat {
        order_id: OrderId,
    },
    CloseChat,
    SendChatMessage {
        order_id: OrderId,
        text: String,
    },
}

enum UiEvent {
    LoginOk {
        user_id: UserId,
        role: Role,
    },
    OrdersLoaded(Vec<OrderSummary>),
    OrderCreated {
        order_id: OrderId,
    },
    CreateOrderDenied,
    ChatRefreshed {
        order_id: OrderId,
        messages: Vec<ChatMessagePayload>,
    },
    Info(String),
    Error(String),
}

fn queue_command(cmd_tx: &Sender<BackendCommand>, cmd: BackendCommand, status: &mut String) {
    let cmd_name = match &cmd {
        BackendCommand::Login { .. } => "login",
        BackendCommand::RefreshOrders => "refresh_orders",
        BackendCommand::CreateOrder { .. } => "create_order",
        BackendCommand::OpenChat { .. } => "open_chat",
        BackendCommand::CloseChat => "close_chat",
        BackendCommand::SendChatMessage { .. } => "send_chat_message",
    };

    match cmd_tx.try_send(cmd) {
        Ok(()) => tracing::debug!(command = cmd_name, "queued ui->backend command"),
        Err(TrySendError::Full(_)) => {
            *status = "UI command queue is full; please retry".to_string();
        }
        Err(TrySendError::Disconnected(_)) => {
            *status = "Backend worker disconnected; restart the app".to_string();
        }
    }
}

fn spawn_backend_thread(cmd_rx: Receiver<BackendCommand>, ui_tx: Sender<UiEvent>) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::Error(format!(
                    "backend worker startup failure: {err}"
                )));
                tracing::error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(async move {
            let client = OrderDeskClient::new();

            let mut events = client.subscribe_events();
            let ui_tx_events = ui_tx.clone();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    let event = match event {
                        ClientEvent::ChatRefreshed { order_id, messages } => {
                            UiEvent::ChatRefreshed { order_id, messages }
                        }
                        ClientEvent::Error(message) => UiEvent::Error(message),
                    };
                    let _ = ui_tx_events.try_send(event);
                }
            });

            let _ = ui_tx.try_send(UiEvent::Info("Backend worker ready".to_string()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    BackendCommand::Login {
                        server_url,
                        username,
                    } => match client.login(&server_url, &username).await {
                        Ok((user_id, role)) => {
                            let _ = ui_tx.try_send(UiEvent::LoginOk { user_id, role });
                        }
                        Err(err) => {
                            let _ = ui_tx.try_send(UiEvent::Error(format!("login failed: {err}")));
                        }
                    },
                    BackendCommand::RefreshOrders => match client.list_orders().await {
                        Ok(orders) => {
                            let _ = ui_tx.try_send(UiEvent::OrdersLoaded(orders));
                        }
                        Err(err) => {
                            let _ = ui_tx
                                .try_send(UiEvent::Error(format!("order listing failed: {err}")));
                        }
                    },
                    BackendCommand::CreateOrder { request } => {
                        match client.create_order(&request).await {
                            Ok(order_id) => {
                                let _ = ui_tx.try_send(UiEvent::OrderCreated { order_id });
                            }
                            Err(CreateOrderError::Forbidden) => {
                                let _ = ui_tx.try_send(UiEvent::CreateOrderDenied);
                            }
                            Err(err) => {
                                let _ = ui_tx.try_send(UiEvent::Error(format!(
                                    "order creation failed: {err}"
                                )));
                            }
                        }
                    }
                    BackendCommand::OpenChat { order_id } => {
                        if let Err(err) = client.open_chat(order_id).await {
                            let _ = ui_tx.try_send(UiEvent::Error(format!(
                                "failed to open chat for order {}: {err}",
                                order_id.0
                            )));
                        }
                    }
                    BackendCommand::CloseChat => client.close_chat().await,
                    BackendCommand::SendChatMessage { order_id, text } => {
                        if let Err(err) = client.post_message(order_id, &text).await {
                            let _ = ui_tx
                                .try_send(UiEvent::Error(format!("message send failed: {err}")));
                        }
                    }
                }
            }
        });
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppViewState {
    Login,
    Main,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    MyOrders,
    AllOrders,
    NewOrder,
}

impl Tab {
    fn label(self) -> &'static str {
        match self {
            Tab::MyOrders => "My orders",
            Tab::AllOrders => "All orders",
            Tab::NewOrder => "New order",
        }
    }
}

/// The order tabs the legacy page only rendered for admins stay admin-only:
/// regular users land on (and keep) their own orders.
fn visible_tabs(role: Option<Role>) -> &'static [Tab] {
    match role {
        Some(Role::Admin) => &[Tab::MyOrders, Tab::AllOrders, Tab::NewOrder],
        _ => &[Tab::MyOrders],
    }
}

#[derive(Default)]
struct NewOrderForm {
    customer: String,
    items: String,
    notes: String,
}

struct ChatPanel {
    order_id: OrderId,
    messages: Vec<ChatMessagePayload>,
    composer: String,
}

struct DeskApp {
    cmd_tx: Sender<BackendCommand>,
    ui_rx: Receiver<UiEvent>,

    server_url: String,
    username: String,
    view_state: AppViewState,
    user_id: Option<UserId>,
    role: Option<Role>,

    active_tab: Tab,
    orders: Vec<OrderSummary>,
    orders_loaded: bool,
    new_order: NewOrderForm,
    chat: Option<ChatPanel>,

    alert: Option<String>,
    status: String,
}

impl DeskApp {
    fn new(
        cmd_tx: Sender<BackendCommand>,
        ui_rx: Receiver<UiEvent>,
        server_url: String,
        username: String,
    ) -> Self {
        Self {
            cmd_tx,
            ui_rx,
            server_url,
            username,
            view_state: AppViewState::Login,
            user_id: None,
            role: None,
            active_tab: Tab::MyOrders,
            orders: Vec::new(),
            orders_loaded: false,
            new_order: NewOrderForm::default(),
            chat: None,
            alert: None,
            status: "Not logged in".to_string(),
        }
    }

    fn process_ui_events(&mut self) {
        while let Ok(event) = self.ui_rx.try_recv() {
            match event {
                UiEvent::LoginOk { user_id, role } => {
                    self.user_id = Some(user_id);
                    self.role = Some(role);
                    self.view_state = AppViewState::Main;
                    self.active_tab = Tab::MyOrders;
                    self.orders.clear();
                    self.orders_loaded = false;
                    self.chat = None;
                    self.status = format!("Logged in as {}", self.username);
                    queue_command(&self.cmd_tx, BackendCommand::RefreshOrders, &mut self.status);
                }
                UiEvent::OrdersLoaded(orders) => {
                    self.orders = orders;
                    self.orders_loaded = true;
                }
                UiEvent::OrderCreated { order_id } => {
                    self.new_order = NewOrderForm::default();
                    self.status = format!("Order #{} created", order_id.0);
                    self.open_chat_for(order_id);
                    queue_command(&self.cmd_tx, BackendCommand::RefreshOrders, &mut self.status);
                }
                UiEvent::CreateOrderDenied => {
                    self.alert = Some("Not authorized to create orders.".to_string());
                }
                UiEvent::ChatRefreshed { order_id, messages } => {
                    if let Some(chat) = self.chat.as_mut() {
                        if chat.order_id == order_id {
                            chat.messages = messages;
                        }
                    }
                }
                UiEvent::Info(message) => {
                    self.status = message;
                }
                UiEvent::Error(message) => {
                    tracing::error!("{message}");
                    self.status = message;
                }
            }
        }
    }

    fn try_login(&mut self) {
        let server = self.server_url.trim().to_string();
        if server.is_empty() {
            self.status = "Server URL is required".to_string();
            return;
        }
        let username = self.username.trim().to_string();
        if username.is_empty() {
            self.status = "Username is required".to_string();
            return;
        }
        queue_command(
            &self.cmd_tx,
            BackendCommand::Login {
                server_url: server,
                username,
            },
            &mut self.status,
        );
        self.status = "Signing in...".to_string();
    }

    fn sign_out(&mut self) {
        queue_command(&self.cmd_tx, BackendCommand::CloseChat, &mut self.status);
        self.view_state = AppViewState::Login;
        self.user_id = None;
        self.role = None;
        self.orders.clear();
        self.orders_loaded = false;
        self.chat = None;
        self.status = "Signed out".to_string();
    }

    fn open_chat_for(&mut self, order_id: OrderId) {
        if self.chat.as_ref().map(|c| c.order_id) == Some(order_id) {
            return;
        }
        self.chat = Some(ChatPanel {
            order_id,
            messages: Vec::new(),
            composer: String::new(),
        });
        queue_command(
            &self.cmd_tx,
            BackendCommand::OpenChat { order_id },
            &mut self.status,
        );
    }

    fn show_login_screen(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(60.0);
            ui.vertical_centered(|ui| {
                ui.set_width(420.0);
                ui.heading("Order Desk");
                ui.weak("Sign in to manage orders and chat with the desk.");
                ui.add_space(12.0);

                ui.label(egui::RichText::new("Server URL").strong());
                ui.text_edit_singleline(&mut self.server_url);
                ui.add_space(6.0);
                ui.label(egui::RichText::new("Username").strong());
                let username_resp = ui.text_edit_singleline(&mut self.username);

                ui.add_space(10.0);
                let submit_via_enter =
                    username_resp.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if ui.button("Sign in").clicked() || submit_via_enter {
                    self.try_login();
                }

                ui.add_space(10.0);
                ui.separator();
                ui.horizontal_wrapped(|ui| {
                    ui.small("Status:");
                    ui.small(egui::RichText::new(&self.status).weak());
                });
            });
        });
    }

    fn show_main_workspace(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("tab_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.strong("Order Desk");
                ui.separator();
                let mut selected_tab = None;
                for tab in visible_tabs(self.role) {
                    if ui
                        .selectable_label(self.active_tab == *tab, tab.label())
                        .clicked()
                    {
                        selected_tab = Some(*tab);
                    }
                }
                if let Some(tab) = selected_tab {
                    self.switch_tab(tab);
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Sign out").clicked() {
                        self.sign_out();
                    }
                    ui.label(&self.username);
                    if self.role == Some(Role::Admin) {
                        ui.small("admin");
                    }
                });
            });
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                ui.small("Status:");
                ui.small(egui::RichText::new(&self.status).weak());
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| match self.active_tab {
            Tab::MyOrders => self.show_order_list(ui, false),
            Tab::AllOrders => self.show_order_list(ui, true),
            Tab::NewOrder => self.show_new_order_form(ui),
        });

        if self.view_state == AppViewState::Main {
            self.show_chat_window(ctx);
            self.show_alert(ctx);
        }
    }

    fn switch_tab(&mut self, tab: Tab) {
        self.active_tab = tab;
        // Entering an order tab reloads the listing, like the legacy page did.
        if matches!(tab, Tab::MyOrders | Tab::AllOrders) {
            self.orders_loaded = false;
            queue_command(&self.cmd_tx, BackendCommand::RefreshOrders, &mut self.status);
        }
    }

    fn show_order_list(&mut self, ui: &mut egui::Ui, show_creator: bool) {
        if self.orders.is_empty() {
            if self.orders_loaded {
                ui.label("No orders found.");
            } else {
                ui.label("Loading orders...");
            }
            return;
        }

        let mut clicked_order = None;
        egui::ScrollArea::vertical().show(ui, |ui| {
            for order in &self.orders {
                ui.group(|ui| {
                    ui.horizontal(|ui| {
                        ui.strong(format!("Order #{} - {}", order.id.0, order.customer));
                        ui.with_layout(
                            egui::Layout::right_to_left(egui::Align::Center),
                            |ui| {
                                if ui.button("Open chat").clicked() {
                                    clicked_order = Some(order.id);
                                }
                            },
                        );
                    });
                    ui.label(format!("Items: {}", order.items));
                    if let Some(notes) = &order.notes {
                        ui.label(format!("Notes: {notes}"));
                    }
                    ui.horizontal_wrapped(|ui| {
                        ui.small(format!("Status: {}", order.status.as_str()));
                        if show_creator {
                            ui.small(format!("Created by: {}", order.created_by_username));
                        }
                        ui.small(format!(
                            "Date: {}",
                            order
                                .created_at
                                .with_timezone(&Local)
                                .format("%d/%m/%Y %H:%M")
                        ));
                    });
                });
                ui.add_space(4.0);
            }
        });

        if let Some(order_id) = clicked_order {
            self.open_chat_for(order_id);
        }
    }

    fn show_new_order_form(&mut self, ui: &mut egui::Ui) {
        ui.heading("New order");
        ui.add_space(6.0);

        ui.label(egui::RichText::new("Customer").strong());
        ui.text_edit_singleline(&mut self.new_order.customer);
        ui.add_space(4.0);
        ui.label(egui::RichText::new("Items").strong());
        ui.text_edit_singleline(&mut self.new_order.items);
        ui.add_space(4.0);
        ui.label(egui::RichText::new("Notes").strong());
        ui.text_edit_multiline(&mut self.new_order.notes);

        ui.add_space(8.0);
        if ui.button("Create order").clicked() {
            let customer = self.new_order.customer.trim().to_string();
            let items = self.new_order.items.trim().to_string();
            if customer.is_empty() || items.is_empty() {
                self.status = "Customer and items are required".to_string();
                return;
            }
            let notes = self.new_order.notes.trim();
            let request = CreateOrderRequest {
                customer,
                items,
                notes: (!notes.is_empty()).then(|| notes.to_string()),
            };
            queue_command(
                &self.cmd_tx,
                BackendCommand::CreateOrder { request },
                &mut self.status,
            );
            self.status = "Creating order...".to_string();
        }
    }

    fn show_chat_window(&mut self, ctx: &egui::Context) {
        let Some(mut chat) = self.chat.take() else {
            return;
        };

        let mut keep_open = true;
        let mut send_text = None;
        let own_user_id = self.user_id;

        egui::Window::new(format!("Chat - order #{}", chat.order_id.0))
            .open(&mut keep_open)
            .default_size([380.0, 420.0])
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .stick_to_bottom(true)
                    .max_height(320.0)
                    .show(ui, |ui| {
                        for message in &chat.messages {
                            let own = own_user_id == Some(message.sender_id);
                            let align = if own { egui::Align::Max } else { egui::Align::Min };
                            ui.with_layout(egui::Layout::top_down(align), |ui| {
                                ui.group(|ui| {
                                    if let Some(sender) = &message.sender_username {
                                        ui.strong(sender);
                                    }
                                    ui.label(&message.text);
                                    ui.small(
                                        message
                                            .sent_at
                                            .with_timezone(&Local)
                                            .format("%d/%m/%Y %H:%M")
                                            .to_string(),
                                    );
                                });
                            });
                            ui.add_space(2.0);
                        }
                    });

                ui.separator();
                ui.horizontal(|ui| {
                    let composer_resp = ui.add(
                        egui::TextEdit::singleline(&mut chat.composer)
                            .hint_text("Type a message")
                            .desired_width(ui.available_width() - 60.0),
                    );
                    let submit_via_enter = composer_resp.lost_focus()
                        && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.button("Send").clicked() || submit_via_enter {
                        if !chat.composer.trim().is_empty() {
                            send_text = Some(chat.composer.trim().to_string());
                        }
                        chat.composer.clear();
                        composer_resp.request_focus();
                    }
                });
            });

        let order_id = chat.order_id;
        if keep_open {
            self.chat = Some(chat);
            if let Some(text) = send_text {
                queue_command(
                    &self.cmd_tx,
                    BackendCommand::SendChatMessage { order_id, text },
                    &mut self.status,
                );
            }
        } else {
            queue_command(&self.cmd_tx, BackendCommand::CloseChat, &mut self.status);
        }
    }

    fn show_alert(&mut self, ctx: &egui::Context) {
        let Some(message) = self.alert.clone() else {
            return;
        };
        egui::Window::new("Not authorized")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(message);
                ui.add_space(6.0);
                ui.vertical_centered(|ui| {
                    if ui.button("OK").clicked() {
                        self.alert = None;
                    }
                });
            });
    }
}

impl eframe::App for DeskApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_ui_events();

        match self.view_state {
            AppViewState::Login => self.show_login_screen(ctx),
            AppViewState::Main => self.show_main_workspace(ctx),
        }

        // Watcher refreshes arrive without input events; keep frames coming.
        ctx.request_repaint_after(Duration::from_millis(250));
    }
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8090")]
    server_url: String,
    #[arg(long, default_value = "")]
    username: String,
}

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(256);
    let (ui_tx, ui_rx) = bounded::<UiEvent>(2048);
    spawn_backend_thread(cmd_rx, ui_tx);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Order Desk")
            .with_inner_size([1080.0, 720.0])
            .with_min_inner_size([820.0, 560.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Order Desk",
        options,
        Box::new(|_cc| {
            Ok(Box::new(DeskApp::new(
                cmd_tx,
                ui_rx,
                args.server_url,
                args.username,
            )))
        }),
    )
}
